pub mod config;
pub mod error;
pub mod hosts;
pub mod paths;
pub mod persist;
pub mod policy;
pub mod settings;
pub mod status;
pub mod types;
pub mod validation;

pub use config::*;
pub use error::*;
pub use hosts::*;
pub use paths::*;
pub use persist::*;
pub use policy::*;
pub use settings::*;
pub use status::*;
pub use types::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::{
        parse_config, parse_settings, Config, HutchPolicy, IocProc, IocStatusFile, Paths,
        Validate,
    };
    use std::any::TypeId;
    use std::path::Path;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<Config>();
        let _ = TypeId::of::<IocProc>();
        let _ = TypeId::of::<IocStatusFile>();
        let _ = TypeId::of::<HutchPolicy>();
        let _ = TypeId::of::<Paths>();
    }

    #[test]
    fn crate_root_reexports_parse_and_validate_helpers() {
        let config = parse_config(
            r#"
hosts = ["ioc-host"]

[[ioc]]
name = "ioc-a"
host = "ioc-host"
port = 30001
path = "ioc/a"
"#,
            Path::new("inline.cfg"),
        )
        .expect("parse config");
        assert!(Validate::validate(&config).is_empty());

        let mut settings = parse_settings("").expect("parse settings");
        assert!(settings.validate().is_empty());
        settings.reconcile.max_parallel_sessions = 0;
        assert!(settings
            .validate()
            .iter()
            .any(|issue| issue.code == "reconcile.max_parallel_sessions.zero"));
    }
}
