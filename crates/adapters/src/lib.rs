pub mod catalogue;
pub mod dsn;
pub mod mysql;

pub use mysql::{MysqlBackend, MysqlHandle};

#[must_use]
pub fn adapter_name() -> &'static str {
    "nextop-adapters"
}

#[cfg(test)]
mod tests {
    use super::adapter_name;

    #[test]
    fn adapter_name_is_stable() {
        assert_eq!(adapter_name(), "nextop-adapters");
    }
}
