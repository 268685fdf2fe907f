pub mod codec;
pub mod guard;
