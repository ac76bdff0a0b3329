//! Toy model configuration.

/// Shape of the stacked-linear demo model.
#[derive(Debug, Clone)]
pub struct SimpleModelConfig {
    /// Input and hidden width.
    pub width: usize,
    /// Number of output classes.
    pub outputs: usize,
    /// Number of hidden `width x width` layers before the output layer.
    pub hidden_layers: usize,
    /// Insert a ReLU after every hidden layer.
    pub activations: bool,
}

impl Default for SimpleModelConfig {
    fn default() -> Self {
        Self {
            width: 100,
            outputs: 2,
            hidden_layers: 4,
            activations: false,
        }
    }
}

impl SimpleModelConfig {
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn with_outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_hidden_layers(mut self, n: usize) -> Self {
        self.hidden_layers = n;
        self
    }

    pub fn with_activations(mut self, enabled: bool) -> Self {
        self.activations = enabled;
        self
    }

    /// Number of leaf layers the model flattens to.
    pub fn num_layers(&self) -> usize {
        let relus = if self.activations { self.hidden_layers } else { 0 };
        self.hidden_layers + 1 + relus
    }
}
