pub mod io_loop;
pub mod keypad;
pub mod tone;

pub use io_loop::{start, DtmfSink, EndpointHandle, EndpointOptions};
pub use keypad::DtmfKey;
