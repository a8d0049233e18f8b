//! Configuration for the lowering driver.

/// Options that change how programs are lowered.
#[derive(Clone)]
pub struct Config {
    /// When enabled, `NEW` on a class in the runtime catalog (such as the
    /// built-in string builder) calls the runtime constructor directly
    /// instead of allocating and constructing through user code.
    pub runtime_type_bridging: bool,
}

impl Config {
    pub fn new() -> Config {
        Config { runtime_type_bridging: true }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
