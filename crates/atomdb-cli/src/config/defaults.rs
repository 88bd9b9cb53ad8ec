pub struct DefaultsConfig {
    pub use_lock_file: bool,
    pub create_indices: bool,
    pub limit: Option<usize>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            use_lock_file: false,
            create_indices: true,
            limit: None,
        }
    }
}
