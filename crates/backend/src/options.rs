use crate::operand::{FusionOperator, Operand};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DevicePreference {
    #[default]
    Default,
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PowerPreference {
    #[default]
    Default,
    HighPerformance,
    LowPower,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ContextOptions {
    pub device_preference: DevicePreference,
    pub power_preference: PowerPreference,
}

/// Element-wise activations. Usable standalone or fused into an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Relu,
    LeakyRelu { alpha: f32 },
    Sigmoid,
    Tanh,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AutoPad {
    #[default]
    Explicit,
    SameUpper,
    SameLower,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InputOperandLayout {
    #[default]
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperandLayout {
    Oihw,
    Hwio,
    Ohwi,
    Ihwo,
    Iohw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dOptions {
    /// `[beginning height, ending height, beginning width, ending width]`
    pub padding: [u32; 4],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    pub auto_pad: AutoPad,
    pub groups: u32,
    pub input_layout: InputOperandLayout,
    pub filter_layout: FilterOperandLayout,
    pub bias: Option<Operand>,
    pub activation: Option<FusionOperator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvTranspose2dOptions {
    /// `[beginning height, ending height, beginning width, ending width]`
    pub padding: [u32; 4],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    pub output_padding: [u32; 2],
    /// Overrides `output_padding` when present.
    pub output_sizes: Option<[u32; 2]>,
    pub auto_pad: AutoPad,
    pub groups: u32,
    pub input_layout: InputOperandLayout,
    pub filter_layout: FilterOperandLayout,
    pub bias: Option<Operand>,
    pub activation: Option<FusionOperator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GemmOptions {
    pub c: Option<Operand>,
    pub alpha: f32,
    pub beta: f32,
    pub a_transpose: bool,
    pub b_transpose: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormalizationOptions {
    pub scale: Option<Operand>,
    pub bias: Option<Operand>,
    pub axis: u32,
    pub epsilon: f32,
    pub activation: Option<FusionOperator>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RecurrentNetworkDirection {
    #[default]
    Forward,
    Backward,
    Both,
}

/// Gate order of the packed GRU weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GruWeightLayout {
    #[default]
    Zrn,
    Rzn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GruOptions {
    pub bias: Option<Operand>,
    pub recurrent_bias: Option<Operand>,
    pub initial_hidden_state: Option<Operand>,
    pub reset_after: bool,
    pub return_sequence: bool,
    pub direction: RecurrentNetworkDirection,
    pub layout: GruWeightLayout,
    /// Update/reset gate activation followed by the new gate activation.
    /// Defaults to `[sigmoid, tanh]`.
    pub activations: Option<Vec<FusionOperator>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillSequenceOptions {
    pub start: f32,
    pub delta: f32,
}

impl Activation {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Relu => x.max(0.0),
            Self::LeakyRelu { alpha } => {
                if x < 0.0 {
                    alpha * x
                } else {
                    x
                }
            }
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
        }
    }
}

impl Default for Conv2dOptions {
    fn default() -> Self {
        Self {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            auto_pad: AutoPad::Explicit,
            groups: 1,
            input_layout: InputOperandLayout::Nchw,
            filter_layout: FilterOperandLayout::Oihw,
            bias: None,
            activation: None,
        }
    }
}

impl Default for ConvTranspose2dOptions {
    fn default() -> Self {
        Self {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            output_padding: [0, 0],
            output_sizes: None,
            auto_pad: AutoPad::Explicit,
            groups: 1,
            input_layout: InputOperandLayout::Nchw,
            filter_layout: FilterOperandLayout::Iohw,
            bias: None,
            activation: None,
        }
    }
}

impl Default for GemmOptions {
    fn default() -> Self {
        Self {
            c: None,
            alpha: 1.0,
            beta: 1.0,
            a_transpose: false,
            b_transpose: false,
        }
    }
}

impl Default for BatchNormalizationOptions {
    fn default() -> Self {
        Self {
            scale: None,
            bias: None,
            axis: 1,
            epsilon: 1e-5,
            activation: None,
        }
    }
}

impl Default for GruOptions {
    fn default() -> Self {
        Self {
            bias: None,
            recurrent_bias: None,
            initial_hidden_state: None,
            reset_after: true,
            return_sequence: false,
            direction: RecurrentNetworkDirection::Forward,
            layout: GruWeightLayout::Zrn,
            activations: None,
        }
    }
}

#[test]
fn apply_activations() {
    assert_eq!(Activation::Relu.apply(-1.0), 0.0);
    assert_eq!(Activation::Relu.apply(2.0), 2.0);
    assert_eq!(Activation::LeakyRelu { alpha: 0.1 }.apply(-2.0), -0.2);
    assert_eq!(Activation::LeakyRelu { alpha: 0.0 }.apply(-2.0), 0.0);
    assert_eq!(Activation::Sigmoid.apply(0.0), 0.5);
    assert_eq!(Activation::Tanh.apply(0.0), 0.0);
}
