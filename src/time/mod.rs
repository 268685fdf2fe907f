pub mod clock;
pub mod fixed_clock;
pub mod system_clock;
