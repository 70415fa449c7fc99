//! Adapter registry: maintenance policy, plugin availability, and the
//! fail-closed selection contract.
//!
//! The registry itself is pure: the CLI reads the environment once at
//! startup and hands the raw token list / file bytes in. Evaluation is
//! read-only and idempotent, so no file locking is ever needed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use weftend_core::codes;
use weftend_core::entities::SCHEMA_ADAPTER_MAINTENANCE;
use weftend_core::order::stable_sort_unique_v0;

/// A registered adapter: name, class, and the host plugins it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterSpec {
    pub name: &'static str,
    pub class: &'static str,
    pub plugins_required: &'static [&'static str],
}

/// The built-in adapter set. Names are lowercase tokens; maintenance
/// policies address adapters by these names.
pub const BUILTIN_ADAPTERS: &[AdapterSpec] = &[
    AdapterSpec {
        name: "archive",
        class: "archive",
        plugins_required: &["zip-reader"],
    },
    AdapterSpec {
        name: "email",
        class: "email",
        plugins_required: &["mail-parser"],
    },
    AdapterSpec {
        name: "container",
        class: "container",
        plugins_required: &["docker-daemon"],
    },
    AdapterSpec {
        name: "web",
        class: "web",
        plugins_required: &[],
    },
    AdapterSpec {
        name: "mod",
        class: "mod",
        plugins_required: &[],
    },
    AdapterSpec {
        name: "generic",
        class: "generic",
        plugins_required: &[],
    },
];

/// On-disk maintenance policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MaintenanceFile {
    pub schema: String,
    pub disabled_adapters: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceSource {
    None,
    Env,
    File,
}

/// Parsed maintenance state. Unknown tokens are retained but never
/// disable anything; a malformed file poisons every selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenancePolicy {
    pub disabled: BTreeSet<String>,
    pub unknown_tokens: Vec<String>,
    pub invalid_reason_code: Option<&'static str>,
    pub source: MaintenanceSource,
}

impl MaintenancePolicy {
    /// No maintenance configured: everything enabled.
    pub fn enabled_default() -> Self {
        MaintenancePolicy {
            disabled: BTreeSet::new(),
            unknown_tokens: Vec::new(),
            invalid_reason_code: None,
            source: MaintenanceSource::None,
        }
    }

    /// Parse a comma-separated token list (`WEFTEND_ADAPTER_DISABLE`).
    pub fn from_env_token_list(value: &str) -> Self {
        let mut policy = MaintenancePolicy {
            disabled: BTreeSet::new(),
            unknown_tokens: Vec::new(),
            invalid_reason_code: None,
            source: MaintenanceSource::Env,
        };
        let tokens = stable_sort_unique_v0(value.split(',').map(|t| t.to_ascii_lowercase()));
        for token in tokens {
            if BUILTIN_ADAPTERS.iter().any(|a| a.name == token) {
                policy.disabled.insert(token);
            } else {
                policy.unknown_tokens.push(token);
            }
        }
        policy
    }

    /// Parse a maintenance policy file (`WEFTEND_ADAPTER_DISABLE_FILE`).
    /// A malformed document fails closed: every selection will report
    /// `ADAPTER_POLICY_INVALID`.
    pub fn from_policy_file_bytes(bytes: &[u8]) -> Self {
        let invalid = MaintenancePolicy {
            disabled: BTreeSet::new(),
            unknown_tokens: Vec::new(),
            invalid_reason_code: Some(codes::ADAPTER_POLICY_FILE_INVALID),
            source: MaintenanceSource::File,
        };
        let parsed: MaintenanceFile = match serde_json::from_slice(bytes) {
            Ok(p) => p,
            Err(_) => return invalid,
        };
        if parsed.schema != SCHEMA_ADAPTER_MAINTENANCE {
            return invalid;
        }
        let mut policy = MaintenancePolicy {
            disabled: BTreeSet::new(),
            unknown_tokens: Vec::new(),
            invalid_reason_code: None,
            source: MaintenanceSource::File,
        };
        for token in stable_sort_unique_v0(
            parsed
                .disabled_adapters
                .iter()
                .map(|t| t.to_ascii_lowercase()),
        ) {
            if BUILTIN_ADAPTERS.iter().any(|a| a.name == token) {
                policy.disabled.insert(token);
            } else {
                policy.unknown_tokens.push(token);
            }
        }
        policy
    }

    /// Serialize the current state back to the file schema.
    pub fn to_file(&self) -> MaintenanceFile {
        MaintenanceFile {
            schema: SCHEMA_ADAPTER_MAINTENANCE.to_string(),
            disabled_adapters: self.disabled.iter().cloned().collect(),
        }
    }
}

/// Host capability probe: which plugins does this host actually have?
pub trait PluginProbe {
    fn is_available(&self, plugin: &str) -> bool;
}

/// Probe that reports everything present (plain filesystem hosts).
pub struct AllAvailableProbe;

impl PluginProbe for AllAvailableProbe {
    fn is_available(&self, _plugin: &str) -> bool {
        true
    }
}

/// Fixed-set probe for tests and doctor simulations.
pub struct StaticProbe(pub BTreeSet<String>);

impl PluginProbe for StaticProbe {
    fn is_available(&self, plugin: &str) -> bool {
        self.0.contains(plugin)
    }
}

/// Selection failure, carrying the stable reason code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectError {
    pub code: &'static str,
    pub adapter: String,
}

/// Registry state resolved once per process startup.
pub struct AdapterRegistry {
    policy: MaintenancePolicy,
    missing_plugins: BTreeSet<String>,
}

impl AdapterRegistry {
    pub fn new(policy: MaintenancePolicy, probe: &dyn PluginProbe) -> Self {
        let mut missing = BTreeSet::new();
        for adapter in BUILTIN_ADAPTERS {
            for plugin in adapter.plugins_required {
                if !probe.is_available(plugin) {
                    missing.insert((*plugin).to_string());
                }
            }
        }
        AdapterRegistry {
            policy,
            missing_plugins: missing,
        }
    }

    pub fn policy(&self) -> &MaintenancePolicy {
        &self.policy
    }

    /// Resolve an adapter by name, fail-closed.
    pub fn select(&self, name: &str) -> Result<&'static AdapterSpec, SelectError> {
        if self.policy.invalid_reason_code.is_some() {
            return Err(SelectError {
                code: codes::ADAPTER_POLICY_INVALID,
                adapter: name.to_string(),
            });
        }
        let spec = BUILTIN_ADAPTERS
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| SelectError {
                code: codes::ADAPTER_UNKNOWN,
                adapter: name.to_string(),
            })?;
        if self.policy.disabled.contains(name) {
            return Err(SelectError {
                code: codes::ADAPTER_TEMPORARILY_UNAVAILABLE,
                adapter: name.to_string(),
            });
        }
        Ok(spec)
    }

    fn adapter_missing_plugins(&self, spec: &AdapterSpec) -> Vec<String> {
        spec.plugins_required
            .iter()
            .filter(|p| self.missing_plugins.contains(**p))
            .map(|p| (*p).to_string())
            .collect()
    }

    /// Merge policy state and plugin availability into the doctor view.
    pub fn doctor(&self, strict: bool) -> DoctorReport {
        let mut rows = Vec::new();
        for spec in BUILTIN_ADAPTERS {
            let missing = self.adapter_missing_plugins(spec);
            let disabled = self.policy.disabled.contains(spec.name);
            let status = if self.policy.invalid_reason_code.is_some() {
                "policy-invalid"
            } else if disabled {
                "disabled"
            } else if !missing.is_empty() {
                "missing-plugin"
            } else {
                "ok"
            };
            rows.push(DoctorRow {
                name: spec.name.to_string(),
                class: spec.class.to_string(),
                disabled,
                missing_plugins: missing,
                status: status.to_string(),
            });
        }

        let mut strict_failures: Vec<String> = Vec::new();
        if strict {
            if self.policy.invalid_reason_code.is_some() {
                strict_failures.push(codes::ADAPTER_DOCTOR_STRICT_POLICY_INVALID.to_string());
            }
            if !self.policy.unknown_tokens.is_empty() {
                strict_failures
                    .push(codes::ADAPTER_DOCTOR_STRICT_POLICY_UNKNOWN_TOKEN.to_string());
            }
            if rows.iter().any(|r| !r.missing_plugins.is_empty()) {
                strict_failures.push(codes::ADAPTER_DOCTOR_STRICT_MISSING_PLUGIN.to_string());
            }
        }

        DoctorReport {
            adapters: rows,
            policy_invalid: self.policy.invalid_reason_code.is_some(),
            unknown_tokens: self.policy.unknown_tokens.clone(),
            strict_failures: stable_sort_unique_v0(strict_failures.iter().map(String::as_str)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorRow {
    pub name: String,
    pub class: String,
    pub disabled: bool,
    pub missing_plugins: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorReport {
    pub adapters: Vec<DoctorRow>,
    pub policy_invalid: bool,
    pub unknown_tokens: Vec<String>,
    pub strict_failures: Vec<String>,
}

impl DoctorReport {
    /// Strict mode fails (exit 40) iff any strict failure code is present.
    pub fn strict_failed(&self) -> bool {
        !self.strict_failures.is_empty()
    }
}
