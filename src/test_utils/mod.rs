//! the test_utils folder here will share utils or test components between
//! unit tests
mod in_memory;

pub use in_memory::*;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}
