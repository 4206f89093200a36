//! Advisory checks over settings and configs.
//!
//! These never block a write; [`crate::Config::validate`] is the hard gate.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::settings::{ManagerSettings, PROCMGRD_PLATFORMS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for ManagerSettings {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let procserv = &self.procserv;

        for (code, value) in [
            ("procserv.connect_timeout.zero", procserv.connect_timeout_ms),
            ("procserv.ack_timeout.zero", procserv.ack_timeout_ms),
            ("procserv.settle_timeout.zero", procserv.settle_timeout_ms),
            ("procserv.close_timeout.zero", procserv.close_timeout_ms),
        ] {
            if value == 0 {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code,
                    message: format!("{} must be greater than zero", code.trim_end_matches(".zero")),
                });
            }
        }

        if procserv.backoff_initial_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "procserv.backoff_initial.zero",
                message: "initial backoff of 0ms makes connect retries spin".to_string(),
            });
        }

        if procserv.backoff_max_ms < procserv.backoff_initial_ms {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "procserv.backoff_max.below_initial",
                message: format!(
                    "backoff_max_ms {} is below backoff_initial_ms {}",
                    procserv.backoff_max_ms, procserv.backoff_initial_ms
                ),
            });
        }

        if procserv.exe.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "procserv.exe.empty",
                message: "procServ executable must not be empty".to_string(),
            });
        }

        if procserv.procmgrd_port(PROCMGRD_PLATFORMS).is_none() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "procserv.procmgrd_base_port.overflow",
                message: format!(
                    "procmgrd_base_port {} leaves no room for {} platforms",
                    procserv.procmgrd_base_port, PROCMGRD_PLATFORMS
                ),
            });
        }

        if self.reconcile.max_parallel_sessions == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "reconcile.max_parallel_sessions.zero",
                message: "max_parallel_sessions must be greater than zero".to_string(),
            });
        }

        issues
    }
}

impl Validate for Config {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if let Err(err) = Config::validate(self) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "config.port.duplicate",
                message: err.to_string(),
            });
        }

        for proc in self.procs().values() {
            if proc.host.trim().is_empty() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "ioc.host.empty",
                    message: format!("ioc {} has no host", proc.name),
                });
            }
            if proc.port == 0 && !proc.hard {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "ioc.port.zero",
                    message: format!("ioc {} has no procServ port", proc.name),
                });
            }
            if proc.path.trim().is_empty() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "ioc.path.empty",
                    message: format!("ioc {} has no release path", proc.name),
                });
            }
            if proc.parent.as_deref() == Some(proc.name.as_str()) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "ioc.parent.self",
                    message: format!("ioc {} lists itself as parent", proc.name),
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::{Validate, ValidationLevel};
    use crate::config::Config;
    use crate::settings::{ManagerSettings, PROCMGRD_PLATFORMS};
    use crate::types::IocProc;

    fn codes(issues: &[super::ValidationIssue]) -> Vec<&'static str> {
        issues.iter().map(|issue| issue.code).collect()
    }

    #[test]
    fn default_settings_are_clean() {
        assert!(Validate::validate(&ManagerSettings::default()).is_empty());
    }

    #[test]
    fn zero_timeouts_and_parallelism_are_errors() {
        let mut settings = ManagerSettings::default();
        settings.procserv.settle_timeout_ms = 0;
        settings.reconcile.max_parallel_sessions = 0;

        let issues = Validate::validate(&settings);
        assert_eq!(
            codes(&issues),
            ["procserv.settle_timeout.zero", "reconcile.max_parallel_sessions.zero"]
        );
        assert!(issues.iter().all(|issue| issue.level == ValidationLevel::Error));
        assert_eq!(issues[0].message, "procserv.settle_timeout must be greater than zero");
    }

    #[test]
    fn inverted_backoff_is_a_warning() {
        let mut settings = ManagerSettings::default();
        settings.procserv.backoff_max_ms = 10;

        let issues = Validate::validate(&settings);
        assert_eq!(codes(&issues), ["procserv.backoff_max.below_initial"]);
        assert_eq!(issues[0].level, ValidationLevel::Warning);
    }

    #[test]
    fn procmgrd_base_port_must_leave_room_for_every_platform() {
        let mut settings = ManagerSettings::default();
        settings.procserv.procmgrd_base_port = u16::MAX - 3;

        let issues = Validate::validate(&settings);
        assert_eq!(codes(&issues), ["procserv.procmgrd_base_port.overflow"]);
        assert_eq!(issues[0].level, ValidationLevel::Error);

        settings.procserv.procmgrd_base_port = u16::MAX - 4;
        assert!(Validate::validate(&settings).is_empty());
    }

    #[test]
    fn config_issues_cover_ports_and_fields() {
        let mut config = Config::new();
        config
            .add_proc(IocProc::new("a", "host", 30001, "ioc/a"))
            .expect("add a");
        config
            .add_proc(IocProc::new("b", "host", 30001, ""))
            .expect("add b");
        config
            .add_proc(IocProc::new("c", "", 0, "ioc/c").with_parent("c"))
            .expect("add c");

        let issues = Validate::validate(&config);
        assert_eq!(
            codes(&issues),
            [
                "config.port.duplicate",
                "ioc.path.empty",
                "ioc.host.empty",
                "ioc.port.zero",
                "ioc.parent.self",
            ]
        );
    }
}
