// FOC (Field Oriented Control) primitives: reference-frame transforms,
// space-vector modulation and the current controller state.

pub mod current_control;
pub mod svm;
pub mod transforms;

pub use current_control::CurrentControl;
pub use svm::svm;
pub use transforms::{clarke, cos_sin, inverse_clarke, inverse_park, park, wrap_pm_pi};
