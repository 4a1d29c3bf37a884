use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use nanolith_core::{DatatypePolicy, FractureConfig, FractureOptions};

use crate::coordinator::Execution;
use crate::gds::{CellExportParams, GdsError};

/// Calendar time written to BGNLIB and BGNSTR records (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::from_unix(secs)
    }

    pub fn from_unix(secs: u64) -> Self {
        let days = (secs / 86_400) as i64;
        let rem = secs % 86_400;

        // days since 1970-01-01 to proleptic Gregorian date
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z - era * 146_097;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = yoe + era * 400 + i64::from(month <= 2);

        Self {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            hour: (rem / 3600) as u8,
            minute: (rem % 3600 / 60) as u8,
            second: (rem % 60) as u8,
        }
    }

    /// Modification and last-access time, both set to this instant.
    pub fn record_fields(&self) -> [i16; 12] {
        let one = [
            self.year as i16,
            self.month as i16,
            self.day as i16,
            self.hour as i16,
            self.minute as i16,
            self.second as i16,
        ];
        let mut fields = [0i16; 12];
        fields[..6].copy_from_slice(&one);
        fields[6..].copy_from_slice(&one);
        fields
    }
}

/// Point limits and datatype conventions of common pattern generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineProfile {
    Unlimited,
    Jeol,
    #[serde(rename = "e-line")]
    ELine,
    Conservative,
}

impl MachineProfile {
    pub fn datatype_policy(self) -> DatatypePolicy {
        match self {
            MachineProfile::Unlimited | MachineProfile::Conservative => DatatypePolicy::Zero,
            MachineProfile::Jeol => DatatypePolicy::AsLayer,
            MachineProfile::ELine => DatatypePolicy::DoseFactor(1.0),
        }
    }

    pub fn point_limit(self) -> Option<usize> {
        match self {
            MachineProfile::Unlimited => None,
            MachineProfile::Jeol | MachineProfile::ELine => Some(4000),
            MachineProfile::Conservative => Some(200),
        }
    }
}

/// Settings of one export run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub library_name: String,
    /// Size of one user unit in metres.
    pub unit: f64,
    /// Database grid steps per user unit.
    pub grid_steps_per_unit: f64,
    pub max_points: Option<usize>,
    pub max_points_line: Option<usize>,
    pub max_interior_holes: usize,
    pub over_fracture_factor: f64,
    pub datatype_policy: DatatypePolicy,
    /// Fixed timestamp for reproducible output; `None` uses the current time.
    pub timestamp: Option<Timestamp>,
    pub parallel: bool,
    pub max_workers: Option<usize>,
    pub fracture: FractureConfig,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            library_name: "nanolith_exported_library".to_string(),
            unit: 1e-6,
            grid_steps_per_unit: 1000.0,
            max_points: Some(4000),
            max_points_line: Some(4000),
            max_interior_holes: 0,
            over_fracture_factor: 1.0,
            datatype_policy: DatatypePolicy::AsLayer,
            timestamp: None,
            parallel: false,
            max_workers: None,
            fracture: FractureConfig::default(),
        }
    }
}

impl ExportOptions {
    pub fn for_profile(profile: MachineProfile) -> Self {
        let mut options = Self::default();
        options.apply_profile(profile);
        options
    }

    pub fn apply_profile(&mut self, profile: MachineProfile) {
        self.datatype_policy = profile.datatype_policy();
        self.max_points = profile.point_limit();
        self.max_points_line = profile.point_limit();
    }

    pub fn from_json(json: &str) -> Result<Self, GdsError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Reject point limits below the fracture minimum and negative dose
    /// factors. A point limit of 0 is accepted and means unlimited.
    pub fn validate(&self) -> Result<(), GdsError> {
        self.fracture_options().validate()?;
        self.datatype_policy.validate()?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, GdsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn fracture_options(&self) -> FractureOptions {
        FractureOptions {
            max_points: self.max_points,
            max_points_line: self.max_points_line,
            max_interior_holes: self.max_interior_holes,
            over_fracture_factor: self.over_fracture_factor,
            config: self.fracture,
        }
    }

    pub fn execution(&self) -> Execution {
        if self.parallel {
            Execution::Parallel {
                max_workers: self.max_workers,
            }
        } else {
            Execution::Serial
        }
    }

    /// Parameters shared by every cell of one export, timestamp resolved.
    pub fn cell_params(&self) -> CellExportParams {
        CellExportParams {
            grid_steps_per_unit: self.grid_steps_per_unit,
            fracture: self.fracture_options(),
            datatype_policy: self.datatype_policy,
            timestamp: self.timestamp.unwrap_or_else(Timestamp::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanolith_core::LayoutError;

    #[test]
    fn test_timestamp_from_unix() {
        let epoch = Timestamp::from_unix(0);
        assert_eq!(epoch.record_fields()[..6], [1970, 1, 1, 0, 0, 0]);

        let t = Timestamp::from_unix(1_700_000_000);
        assert_eq!(
            t,
            Timestamp {
                year: 2023,
                month: 11,
                day: 14,
                hour: 22,
                minute: 13,
                second: 20
            }
        );
        assert_eq!(t.record_fields()[6..], [2023, 11, 14, 22, 13, 20]);

        let leap = Timestamp::from_unix(951_782_400);
        assert_eq!((leap.year, leap.month, leap.day), (2000, 2, 29));
    }

    #[test]
    fn test_profiles() {
        let conservative = ExportOptions::for_profile(MachineProfile::Conservative);
        assert_eq!(conservative.max_points, Some(200));
        assert_eq!(conservative.datatype_policy, DatatypePolicy::Zero);

        let unlimited = ExportOptions::for_profile(MachineProfile::Unlimited);
        assert_eq!(unlimited.fracture_options().max_points, None);

        let eline = ExportOptions::for_profile(MachineProfile::ELine);
        assert_eq!(eline.datatype_policy, DatatypePolicy::DoseFactor(1.0));
    }

    #[test]
    fn test_json_roundtrip_and_partial_documents() {
        let options = ExportOptions {
            parallel: true,
            max_workers: Some(2),
            timestamp: Some(Timestamp::from_unix(0)),
            ..ExportOptions::for_profile(MachineProfile::Jeol)
        };
        let json = options.to_json().unwrap();
        assert_eq!(ExportOptions::from_json(&json).unwrap(), options);
        assert_eq!(
            options.execution(),
            Execution::Parallel {
                max_workers: Some(2)
            }
        );

        let partial = ExportOptions::from_json(r#"{"grid_steps_per_unit": 100.0}"#).unwrap();
        assert_eq!(partial.grid_steps_per_unit, 100.0);
        assert_eq!(partial.library_name, "nanolith_exported_library");
        assert_eq!(partial.execution(), Execution::Serial);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let tiny = ExportOptions {
            max_points: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            tiny.validate(),
            Err(GdsError::Layout(LayoutError::InvalidPointBudget { budget: 5, .. }))
        ));

        let unlimited = ExportOptions {
            max_points: Some(0),
            max_points_line: Some(0),
            ..Default::default()
        };
        assert!(unlimited.validate().is_ok());

        assert!(matches!(
            ExportOptions::from_json(r#"{"datatype_policy": {"DoseFactor": -1.0}}"#),
            Err(GdsError::Layout(LayoutError::NegativeDoseFactor(_)))
        ));
    }
}
