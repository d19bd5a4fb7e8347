pub mod picker;
pub mod render;

pub use picker::{HostPicker, PickerOutcome, PickerView, SessionMode, run_picker};
