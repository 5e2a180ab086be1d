//! Static sensor catalogue for the supported controller families.
//!
//! Each (device kind, sensor code) pair resolves to a [`SensorSpec`]
//! describing how raw broker values decode: a coefficient divisor for
//! numeric sensors, enumeration maps for status tokens, or pass-through.
//! The two `Automatic` families share a base table; `PM5 Chlorine` has
//! its own numbering scheme.
//!
//! Tables are fixed at compile time and indexed into a process-wide map
//! on first use. Call [`verify`] once at startup to validate them
//! instead of discovering a bad entry on the first matching frame.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use serde::Serialize;

use crate::device::DeviceKind;

/// How a sensor's values are produced and whether it accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Read-only numeric reading, scaled by the coefficient.
    Measurement,
    /// Read-only enumerated state (decoded via the status maps).
    Status,
    /// Writable setpoint; encoded via option map or coefficient.
    Select,
}

/// Decode rule for one (device kind, sensor code) pair.
#[derive(Debug)]
pub struct SensorSpec {
    pub code: &'static str,
    pub name: &'static str,
    pub kind: SensorKind,
    pub unit: Option<&'static str>,
    /// Divisor applied to raw numeric values. `-1.0` keeps the raw
    /// rendering as text; `None` passes the value through untouched.
    pub coefficient: Option<f64>,
    /// Display options for enumerated selects. Empty for numeric
    /// selects, which encode through the coefficient instead.
    pub options: &'static [&'static str],
}

const fn measurement(
    code: &'static str,
    name: &'static str,
    coefficient: f64,
    unit: Option<&'static str>,
) -> SensorSpec {
    SensorSpec {
        code,
        name,
        kind: SensorKind::Measurement,
        unit,
        coefficient: Some(coefficient),
        options: &[],
    }
}

const fn text_value(code: &'static str, name: &'static str) -> SensorSpec {
    SensorSpec {
        code,
        name,
        kind: SensorKind::Measurement,
        unit: None,
        coefficient: Some(-1.0),
        options: &[],
    }
}

const fn status(code: &'static str, name: &'static str) -> SensorSpec {
    SensorSpec {
        code,
        name,
        kind: SensorKind::Status,
        unit: None,
        coefficient: None,
        options: &[],
    }
}

const fn select_scaled(
    code: &'static str,
    name: &'static str,
    coefficient: f64,
    unit: Option<&'static str>,
) -> SensorSpec {
    SensorSpec {
        code,
        name,
        kind: SensorKind::Select,
        unit,
        coefficient: Some(coefficient),
        options: &[],
    }
}

const fn select_enum(
    code: &'static str,
    name: &'static str,
    options: &'static [&'static str],
) -> SensorSpec {
    SensorSpec {
        code,
        name,
        kind: SensorKind::Select,
        unit: None,
        coefficient: None,
        options,
    }
}

/// Production-rate multipliers shared by the Automatic select sensors.
const RATE_OPTIONS: &[&str] = &[
    "0.25x", "0.5x", "0.75x", "1.0x", "1.25x", "1.5x", "2x", "3x", "5x", "10x",
];

// ---------------------------------------------------------------------------
// Sensor tables
// ---------------------------------------------------------------------------

/// Sensors shared by both Automatic controller variants.
const AUTOMATIC_BASE: &[SensorSpec] = &[
    select_scaled("4.2", "pH Target", 10.0, None),
    select_scaled("4.3", "pH Alert Max", 10.0, None),
    select_scaled("4.4", "pH Alert Min", 10.0, None),
    measurement("4.5", "pH Dosing Control Time Interval", 1.0, Some("min")),
    measurement("4.7", "Minutes Counter / Reset every hour", 1.0, Some("min")),
    select_scaled("4.26", "Redox Alert Max", 1.0, Some("mV")),
    select_scaled("4.27", "Redox Alert Min", 1.0, Some("mV")),
    select_scaled("4.28", "Redox Target", 1.0, Some("mV")),
    measurement("4.34", "Minimal Approach to Control the pH", 100.0, None),
    select_scaled("4.37", "Start Delay", 1.0, Some("min")),
    measurement("4.38", "pH Dosing Cycle", 1.0, Some("s")),
    measurement("4.47", "pH Dosing Speed", 1.0, Some("%")),
    measurement("4.67", "SW Version", 100.0, None),
    text_value("4.68", "SW Date"),
    measurement("4.69", "Hourly Counter / Reset every 24h", 1.0, Some("h")),
    measurement("4.82", "Redox", 1.0, Some("mV")),
    measurement("4.89", "pH Dosing Rate", 1.0, Some("%")),
    measurement("4.98", "Temperature", 10.0, Some("°C")),
    measurement("4.102", "Conductivity", 10.0, Some("mS/cm")),
    measurement("4.107", "Battery Voltage", 100.0, Some("V")),
    measurement("4.182", "pH", 10.0, None),
    select_enum("5.3", "pH Production Rate", RATE_OPTIONS),
    status("5.80", "pH Minus Canister Status"),
    status("5.98", "Filtration"),
];

/// Sensors specific to the salt-electrolysis variant.
const AUTOMATIC_SALT_EXTRA: &[SensorSpec] = &[
    measurement("4.51", "Polarity Reversal Times", 1.0, Some("min")),
    select_scaled("4.66", "Minimum Redox Produktion", 1.0, Some("%")),
    measurement("4.91", "Electrolyzer Production Rate", 1.0, Some("%")),
    measurement("4.100", "Salt", 10.0, Some("g/l")),
    measurement("4.104", "Electrolyzer Voltage", 10.0, Some("V")),
    measurement("4.105", "Electrolyzer Current", 10.0, Some("A")),
    measurement("4.112", "Time Before Next Polarity Reversal", 1.0, Some("s")),
    measurement("4.119", "Time Since Polarity Reversal", 1.0, Some("s")),
    select_scaled("4.144", "Salt Preferred Level", 10.0, Some("g/l")),
    select_enum("5.40", "Redox ON / OFF", &["On", "Off"]),
    select_enum("5.41", "Redox Mode", &["Auto", "Auto Plus", "Constant production"]),
];

/// Sensors specific to the chlorine-dosing variant.
const AUTOMATIC_CL_PH_EXTRA: &[SensorSpec] = &[
    measurement("4.90", "Cl Dosing Rate", 1.0, Some("%")),
    select_enum("5.175", "Cl Adjust Dosing Amount", RATE_OPTIONS),
    status("5.169", "Cl Canister Status"),
];

/// The PM5 controller uses its own code ranges and scale factors.
const PM5_CHLORINE: &[SensorSpec] = &[
    select_scaled("4.3001", "pH Target", 100.0, None),
    select_scaled("4.3002", "pH Alert Min", 100.0, None),
    select_scaled("4.3003", "pH Alert Max", 100.0, None),
    select_scaled("4.3049", "Redox Target", 1.0, Some("mV")),
    select_scaled("4.3051", "Redox Alert Min", 1.0, Some("mV")),
    select_scaled("4.3053", "Redox Alert Max", 1.0, Some("mV")),
    measurement("4.4001", "pH", 100.0, None),
    measurement("4.4022", "Redox", 1.0, Some("mV")),
    measurement("4.4033", "Water Temperature", 10.0, Some("°C")),
    measurement("4.4069", "Air Temperature", 10.0, Some("°C")),
    measurement("4.4132", "Active Alarms", 1.0, None),
    select_enum("5.5433", "Out 1", &["On", "Off", "Auto"]),
    select_enum("5.5434", "Out 2", &["On", "Off", "Auto"]),
    select_enum("5.5435", "Out 3", &["On", "Off", "Auto"]),
    select_enum("5.5436", "Out 4", &["On", "Off", "Auto"]),
    status("5.6012", "pH Pump"),
    status("5.6015", "Redox Pump Status"),
    status("5.6064", "pH Canister Level"),
    status("5.6065", "pH Status"),
    status("5.6068", "Redox Canister Level"),
    status("5.6069", "Redox Status"),
];

const AUTOMATIC_SALT_TABLES: &[&[SensorSpec]] = &[AUTOMATIC_BASE, AUTOMATIC_SALT_EXTRA];
const AUTOMATIC_CL_PH_TABLES: &[&[SensorSpec]] = &[AUTOMATIC_BASE, AUTOMATIC_CL_PH_EXTRA];
const PM5_CHLORINE_TABLES: &[&[SensorSpec]] = &[PM5_CHLORINE];

const ALL_KINDS: &[DeviceKind] = &[
    DeviceKind::AutomaticSalt,
    DeviceKind::AutomaticClPh,
    DeviceKind::Pm5Chlorine,
];

// ---------------------------------------------------------------------------
// Status and select maps
// ---------------------------------------------------------------------------

/// Wire tokens reported by the controllers for enumerated states.
const STATUS_TOKENS: &[(&str, &str)] = &[
    ("19.18", "On"),
    ("19.19", "Off"),
    ("19.195", "Auto"),
    ("19.115", "Auto Plus"),
    ("19.106", "Constant production"),
    ("19.177", "On"),
    ("19.176", "Off"),
    ("19.257", "Missing"),
    ("19.258", "Not Empty"),
    ("19.259", "Empty"),
];

/// Integer state codes used by the PM5 family.
const STATUS_CODES: &[(i64, &str)] = &[
    (7001, "On"),
    (7002, "Off"),
    (7521, "Full"),
    (7522, "Low"),
    (7523, "Empty"),
    (7524, "Ok"),
    (7525, "Info"),
    (7526, "Warning"),
    (7527, "Alarm"),
];

/// Display option to wire token, Automatic family writes.
///
/// Note the write tokens are not the mirror image of [`STATUS_TOKENS`]:
/// the controllers report `19.18` for On but expect `19.17`/`19.18` for
/// On/Off commands. Both directions follow the controller firmware.
const SELECT_ENCODE_AUTOMATIC: &[(&str, &str)] = &[
    ("0.25x", "19.3"),
    ("0.5x", "19.4"),
    ("0.75x", "19.5"),
    ("1.0x", "19.6"),
    ("1.25x", "19.7"),
    ("1.5x", "19.8"),
    ("2x", "19.9"),
    ("3x", "19.10"),
    ("5x", "19.11"),
    ("10x", "19.12"),
    ("On", "19.17"),
    ("Off", "19.18"),
    ("Constant production", "19.106"),
    ("Auto Plus", "19.115"),
    ("Auto", "19.195"),
    ("Full", "19.258"),
    ("Empty", "19.259"),
];

/// Display option to wire token, PM5 family writes.
const SELECT_ENCODE_PM5: &[(&str, &str)] = &[("On", "7408"), ("Off", "7407"), ("Auto", "7427")];

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

type KindTable = HashMap<&'static str, &'static SensorSpec>;

fn kind_tables(kind: DeviceKind) -> &'static [&'static [SensorSpec]] {
    match kind {
        DeviceKind::AutomaticSalt => AUTOMATIC_SALT_TABLES,
        DeviceKind::AutomaticClPh => AUTOMATIC_CL_PH_TABLES,
        DeviceKind::Pm5Chlorine => PM5_CHLORINE_TABLES,
    }
}

fn catalogue() -> &'static HashMap<DeviceKind, KindTable> {
    static CATALOGUE: OnceLock<HashMap<DeviceKind, KindTable>> = OnceLock::new();
    CATALOGUE.get_or_init(|| {
        let mut by_kind = HashMap::new();
        for &kind in ALL_KINDS {
            let mut table = KindTable::new();
            for specs in kind_tables(kind) {
                for spec in *specs {
                    table.insert(spec.code, spec);
                }
            }
            by_kind.insert(kind, table);
        }
        by_kind
    })
}

/// Look up the decode rule for a sensor on a given controller family.
pub fn sensor_spec(kind: DeviceKind, code: &str) -> Option<&'static SensorSpec> {
    catalogue().get(&kind).and_then(|table| table.get(code)).copied()
}

/// All sensors of a controller family, in table order.
///
/// Used by the feed connector to build its subscription set.
pub fn sensor_specs(kind: DeviceKind) -> impl Iterator<Item = &'static SensorSpec> {
    kind_tables(kind).iter().flat_map(|specs| specs.iter())
}

/// Resolve a wire status token (e.g. `"19.18"`) to its display label.
pub fn status_label(token: &str) -> Option<&'static str> {
    STATUS_TOKENS
        .iter()
        .find(|(t, _)| *t == token)
        .map(|(_, label)| *label)
}

/// Resolve an integer state code (e.g. `7002`) to its display label.
pub fn status_label_for_code(code: i64) -> Option<&'static str> {
    STATUS_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}

/// Resolve a select display option to the wire token for its family.
pub fn select_token(kind: DeviceKind, display: &str) -> Option<&'static str> {
    let map = match kind {
        DeviceKind::AutomaticSalt | DeviceKind::AutomaticClPh => SELECT_ENCODE_AUTOMATIC,
        DeviceKind::Pm5Chlorine => SELECT_ENCODE_PM5,
    };
    map.iter().find(|(d, _)| *d == display).map(|(_, token)| *token)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A defect in the static sensor tables.
#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("Duplicate sensor code {code} in {kind} catalogue")]
    DuplicateCode { kind: DeviceKind, code: String },

    #[error("Sensor {code} in {kind} catalogue has a zero coefficient")]
    ZeroCoefficient { kind: DeviceKind, code: String },

    #[error("Select {code} in {kind} catalogue has option {option:?} with no wire encoding")]
    UnmappedOption {
        kind: DeviceKind,
        code: String,
        option: String,
    },

    #[error("Select {code} in {kind} catalogue has neither options nor a coefficient")]
    UnencodableSelect { kind: DeviceKind, code: String },
}

/// Validate the sensor tables.
///
/// Checks for duplicate codes, zero coefficients, select options
/// without a wire encoding, and selects that cannot be encoded at all.
/// Called once at daemon startup so table mistakes surface immediately
/// rather than on the first matching frame.
pub fn verify() -> Result<(), CatalogueError> {
    for &kind in ALL_KINDS {
        let mut seen: HashSet<&str> = HashSet::new();
        for specs in kind_tables(kind) {
            for spec in *specs {
                if !seen.insert(spec.code) {
                    return Err(CatalogueError::DuplicateCode {
                        kind,
                        code: spec.code.to_string(),
                    });
                }
                if spec.coefficient == Some(0.0) {
                    return Err(CatalogueError::ZeroCoefficient {
                        kind,
                        code: spec.code.to_string(),
                    });
                }
                if spec.kind == SensorKind::Select {
                    if spec.options.is_empty() && spec.coefficient.is_none() {
                        return Err(CatalogueError::UnencodableSelect {
                            kind,
                            code: spec.code.to_string(),
                        });
                    }
                    for option in spec.options {
                        if select_token(kind, option).is_none() {
                            return Err(CatalogueError::UnmappedOption {
                                kind,
                                code: spec.code.to_string(),
                                option: option.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
