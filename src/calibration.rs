//! # Calibration Registry Module
//!
//! Fixed table of thermometer calibration curves mapping a raw sensor
//! resistance to a temperature (milliKelvin for the cryogenic sensors).
//!
//! ## Curve Forms
//! - Log polynomial: `prefactor * exp(P(ln(scale * (r - offset)))) + shift`
//! - High/low: two branches split at a model-specific resistance, `r >= threshold`
//!   selects the high branch
//! - Power law: `((ln r - a) / b)^exponent`, used below the SP special threshold
//! - Reciprocal: `numerator / (r - offset)` for the MRDS bridge
//!
//! ## Registry Codes
//! Codes 0..=20 follow the data-logger convention. Codes 2..=10 are the
//! single-branch curves the composite high/low entries are made of; they can
//! be resolved by code but are not part of the selection list.
//!
//! Unknown codes and names resolve to "no conv." so a bad selection never
//! fails a refresh.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CalibrationError;

/// Identifier of a calibration curve in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CalibrationId {
    #[default]
    NoConversion,
    Pt1000,
    FHigh,
    SpSpecial,
    FLow,
    GHigh,
    GLow,
    HHigh,
    HLow,
    NHigh,
    NLow,
    F,
    G,
    H,
    N,
    L,
    M,
    Rf100,
    Mrds,
    Ar3,
    A8,
}

/// Every id, indexed by registry code
const BY_CODE: [CalibrationId; 21] = [
    CalibrationId::NoConversion,
    CalibrationId::Pt1000,
    CalibrationId::FHigh,
    CalibrationId::SpSpecial,
    CalibrationId::FLow,
    CalibrationId::GHigh,
    CalibrationId::GLow,
    CalibrationId::HHigh,
    CalibrationId::HLow,
    CalibrationId::NHigh,
    CalibrationId::NLow,
    CalibrationId::F,
    CalibrationId::G,
    CalibrationId::H,
    CalibrationId::N,
    CalibrationId::L,
    CalibrationId::M,
    CalibrationId::Rf100,
    CalibrationId::Mrds,
    CalibrationId::Ar3,
    CalibrationId::A8,
];

impl CalibrationId {
    /// Curves offered to the operator, in menu order
    pub const SELECTABLE: [CalibrationId; 12] = [
        CalibrationId::NoConversion,
        CalibrationId::Pt1000,
        CalibrationId::F,
        CalibrationId::G,
        CalibrationId::H,
        CalibrationId::N,
        CalibrationId::L,
        CalibrationId::M,
        CalibrationId::Rf100,
        CalibrationId::Mrds,
        CalibrationId::Ar3,
        CalibrationId::A8,
    ];

    pub fn code(self) -> u8 {
        // BY_CODE is ordered like the enum
        self as u8
    }

    /// Look up a registry code, falling back to no conversion
    pub fn from_code(code: u8) -> Self {
        BY_CODE.get(code as usize).copied().unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        match self {
            CalibrationId::NoConversion => "no conv.",
            CalibrationId::Pt1000 => "pt1000",
            CalibrationId::FHigh => "F high",
            CalibrationId::SpSpecial => "SP special",
            CalibrationId::FLow => "F low",
            CalibrationId::GHigh => "G high",
            CalibrationId::GLow => "G low",
            CalibrationId::HHigh => "H high",
            CalibrationId::HLow => "H low",
            CalibrationId::NHigh => "N high",
            CalibrationId::NLow => "N low",
            CalibrationId::F => "F",
            CalibrationId::G => "G",
            CalibrationId::H => "H",
            CalibrationId::N => "N",
            CalibrationId::L => "L",
            CalibrationId::M => "M",
            CalibrationId::Rf100 => "RF100",
            CalibrationId::Mrds => "MRDS",
            CalibrationId::Ar3 => "AR3",
            CalibrationId::A8 => "a8",
        }
    }

    /// Look up a curve by name (case-insensitive), falling back to no conversion
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        BY_CODE
            .iter()
            .copied()
            .find(|id| id.name().eq_ignore_ascii_case(name))
            .unwrap_or_else(|| {
                log::debug!("Unknown calibration {:?}, using no conversion", name);
                CalibrationId::NoConversion
            })
    }

    fn curve(self) -> Curve {
        match self {
            CalibrationId::NoConversion => Curve::Identity,
            CalibrationId::Pt1000 => Curve::Single(Branch::Poly(PT1000)),
            CalibrationId::FHigh => Curve::Single(Branch::Poly(F_HIGH)),
            CalibrationId::SpSpecial => Curve::HighLow {
                threshold: 7850.0,
                high: Branch::Poly(SP_HIGH),
                low: Branch::PowerLaw(SP_LOW),
            },
            CalibrationId::FLow => Curve::Single(Branch::Poly(F_LOW)),
            CalibrationId::GHigh => Curve::Single(Branch::Poly(G_HIGH)),
            CalibrationId::GLow => Curve::Single(Branch::Poly(G_LOW)),
            CalibrationId::HHigh => Curve::Single(Branch::Poly(H_HIGH)),
            CalibrationId::HLow => Curve::Single(Branch::Poly(H_LOW)),
            CalibrationId::NHigh => Curve::Single(Branch::Poly(N_HIGH)),
            CalibrationId::NLow => Curve::Single(Branch::Poly(N_LOW)),
            CalibrationId::F => Curve::high_low(199.8, F_HIGH, F_LOW),
            CalibrationId::G => Curve::high_low(204.7, G_HIGH, G_LOW),
            CalibrationId::H => Curve::high_low(212.79, H_HIGH, H_LOW),
            // Mixing chamber thermometer
            CalibrationId::N => Curve::high_low(225.524, N_HIGH, N_LOW),
            CalibrationId::L => Curve::high_low(223.76, L_HIGH, L_LOW),
            CalibrationId::M => Curve::high_low(234.19, M_HIGH, M_LOW),
            CalibrationId::Rf100 => Curve::high_low(90.0, RF100_HIGH, RF100_LOW),
            CalibrationId::Mrds => Curve::Reciprocal {
                numerator: 102_073.0,
                offset: 5.38,
            },
            CalibrationId::Ar3 => Curve::Single(Branch::Poly(AR3)),
            CalibrationId::A8 => Curve::Single(Branch::Poly(A8)),
        }
    }
}

impl fmt::Display for CalibrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Stored by name in settings files so they stay hand-editable
impl Serialize for CalibrationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CalibrationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(CalibrationId::from_name(&name))
    }
}

/// `prefactor * exp(Σ c_k L^k) + shift` with `L = ln(scale * (r - offset))`
#[derive(Debug, Clone, Copy)]
struct LogPolynomial {
    scale: f64,
    offset: f64,
    prefactor: f64,
    shift: f64,
    coefficients: &'static [f64],
}

impl LogPolynomial {
    const fn in_ln_r(coefficients: &'static [f64]) -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
            prefactor: 1.0,
            shift: 0.0,
            coefficients,
        }
    }

    /// Low-range fits done in milliohm, result in Kelvin/1000
    const fn in_ln_milliohm(coefficients: &'static [f64]) -> Self {
        Self {
            scale: 1000.0,
            offset: 0.0,
            prefactor: 1e-3,
            shift: 0.0,
            coefficients,
        }
    }

    fn eval(&self, r: f64) -> Option<f64> {
        let x = ln(self.scale * (r - self.offset))?;
        let exponent = self
            .coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * x + c);
        Some(self.prefactor * exponent.exp() + self.shift)
    }
}

/// `((ln r - offset) / divisor)^exponent`
#[derive(Debug, Clone, Copy)]
struct PowerLaw {
    offset: f64,
    divisor: f64,
    exponent: f64,
}

impl PowerLaw {
    fn eval(&self, r: f64) -> Option<f64> {
        let base = (ln(r)? - self.offset) / self.divisor;
        // negative base with a fractional exponent has no real value
        if base <= 0.0 {
            return None;
        }
        Some(base.powf(self.exponent))
    }
}

#[derive(Debug, Clone, Copy)]
enum Branch {
    Poly(LogPolynomial),
    PowerLaw(PowerLaw),
}

impl Branch {
    fn eval(&self, r: f64) -> Option<f64> {
        match self {
            Branch::Poly(poly) => poly.eval(r),
            Branch::PowerLaw(law) => law.eval(r),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Curve {
    Identity,
    Single(Branch),
    HighLow {
        threshold: f64,
        high: Branch,
        low: Branch,
    },
    Reciprocal {
        numerator: f64,
        offset: f64,
    },
}

impl Curve {
    const fn high_low(threshold: f64, high: LogPolynomial, low: LogPolynomial) -> Self {
        Curve::HighLow {
            threshold,
            high: Branch::Poly(high),
            low: Branch::Poly(low),
        }
    }
}

fn ln(u: f64) -> Option<f64> {
    (u > 0.0 && u.is_finite()).then(|| u.ln())
}

const PT1000: LogPolynomial = LogPolynomial {
    shift: -280.0,
    ..LogPolynomial::in_ln_r(&[
        15.96010078315383,
        -5.777265693615240,
        1.719621878746819,
        -0.3296896904176034,
        0.0325135160361472,
        -0.001238253183442626,
    ])
};

const F_HIGH: LogPolynomial = LogPolynomial::in_ln_r(&[
    16.01256220008178,
    -24.81483636871209,
    17.32085139761442,
    -6.085430265212089,
    1.173753050126549,
    -0.1183163650122031,
    0.00491460677567561,
]);

const F_LOW: LogPolynomial = LogPolynomial::in_ln_milliohm(&[
    -710.0262877572307,
    322.9179399161088,
    -58.45146855850959,
    5.326453045978480,
    -0.2441816228296264,
    0.00451395822170572,
]);

const SP_HIGH: LogPolynomial = LogPolynomial::in_ln_r(&[
    42.32605191233305,
    -35.48617979865299,
    15.6682358081070,
    -3.820230536108149,
    0.5234443687473452,
    -0.0380286996197814,
    0.001147509051044717,
]);

const SP_LOW: PowerLaw = PowerLaw {
    offset: 6.58231,
    divisor: 28.60582,
    exponent: -1.0 / 0.4712,
};

const G_HIGH: LogPolynomial = LogPolynomial::in_ln_r(&[
    29.58202363692958,
    -45.17177520349549,
    29.88064676651070,
    -10.13755050845119,
    1.89407235107920,
    -0.1852372231339097,
    0.00745225544312689,
]);

const G_LOW: LogPolynomial = LogPolynomial::in_ln_milliohm(&[
    -544.5676017482177,
    248.1849769707541,
    -44.92493250442995,
    4.100831010357989,
    -0.1885849850224576,
    0.00350331131792698,
]);

const H_HIGH: LogPolynomial = LogPolynomial::in_ln_r(&[
    37.63866172713826,
    -56.63260628198017,
    36.44474795527592,
    -12.09994511601816,
    2.217744387707139,
    -0.2131888447891270,
    0.00844030051139322,
]);

const H_LOW: LogPolynomial = LogPolynomial::in_ln_milliohm(&[
    -649.6607257566526,
    294.5907063066699,
    -53.12596898007016,
    4.825044411084273,
    -0.2205324289126790,
    0.00406648820879758,
]);

const N_HIGH: LogPolynomial = LogPolynomial::in_ln_r(&[
    73.41324970439078,
    -106.3311032542545,
    63.82555719639306,
    -19.92653500750758,
    3.450043217733591,
    -0.3148258368795170,
    0.01188214232583087,
]);

// bias corrected
const N_LOW: LogPolynomial = LogPolynomial::in_ln_milliohm(&[
    -1977.61071503373,
    858.8345018658966,
    -149.1881936568861,
    13.01167076142443,
    -0.5697361944449233,
    0.01003208556390609,
]);

const L_HIGH: LogPolynomial = LogPolynomial::in_ln_r(&[
    104.6750874814212,
    -148.3086471863297,
    86.47846539832611,
    -26.30376527679790,
    4.444252174117409,
    -0.3965138967120258,
    0.01465514055121579,
]);

// bias corrected, lead resistance of 5.2 ohm removed
const L_LOW: LogPolynomial = LogPolynomial {
    offset: 5.2,
    ..LogPolynomial::in_ln_r(&[
        -5.943338267631620,
        6.244093734707140,
        -2.011598936020319,
        0.3927201152433503,
        -0.0419866882804895,
        0.002200681550971356,
    ])
};

const M_HIGH: LogPolynomial = LogPolynomial::in_ln_r(&[
    252.7479592137451,
    -335.5111793651910,
    184.2587231397065,
    -53.31965387121053,
    8.607951369319844,
    -0.7358641617817465,
    0.02607920087098386,
]);

// bias corrected
const M_LOW: LogPolynomial = LogPolynomial::in_ln_milliohm(&[
    -1481.063886828427,
    632.4460811462583,
    -108.2946175749663,
    9.345244793972663,
    -0.4063608406993035,
    0.00713527326482104,
]);

const RF100_HIGH: LogPolynomial = LogPolynomial {
    scale: 0.1,
    ..LogPolynomial::in_ln_r(&[
        93.676905857752,
        -217.342944180393,
        189.113889383055,
        -81.142864499611,
        18.635568586572,
        -2.201508223114,
        0.105386314079,
    ])
};

const RF100_LOW: LogPolynomial = LogPolynomial {
    scale: 0.1,
    ..LogPolynomial::in_ln_r(&[
        -466.296008848081,
        784.495465820407,
        -496.814648787330,
        140.391660314194,
        -14.857438050347,
    ])
};

const AR3: LogPolynomial = LogPolynomial::in_ln_r(&[
    -16.985738592265,
    20.869593118260,
    -9.403401237195,
    2.210818028415,
    -0.260713605058,
    0.012529791664,
]);

const A8: LogPolynomial = LogPolynomial::in_ln_r(&[
    -34.124813158161,
    38.543806856537,
    -16.635982614833,
    3.672767013032,
    -0.406705361858,
    0.018288321417,
]);

/// A resolved calibration curve, ready to convert raw readings
#[derive(Debug, Clone, Copy)]
pub struct CalibrationFunction {
    id: CalibrationId,
    curve: Curve,
}

impl CalibrationFunction {
    pub fn id(&self) -> CalibrationId {
        self.id
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.curve, Curve::Identity)
    }

    /// Convert one raw resistance into a temperature
    ///
    /// Identity returns its input untouched. Every other curve fails with
    /// `CalibrationError::Domain` when the input cannot be evaluated or the
    /// result is not finite.
    pub fn apply(&self, r: f64) -> Result<f64, CalibrationError> {
        let value = match self.curve {
            Curve::Identity => return Ok(r),
            Curve::Single(branch) => branch.eval(r),
            Curve::HighLow {
                threshold,
                high,
                low,
            } => {
                if r >= threshold {
                    high.eval(r)
                } else {
                    low.eval(r)
                }
            }
            Curve::Reciprocal { numerator, offset } => Some(numerator / (r - offset)),
        };

        value.filter(|t| t.is_finite()).ok_or(CalibrationError::Domain {
            curve: self.id,
            input: r,
        })
    }
}

/// Lookup from calibration id to conversion function. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationRegistry;

impl CalibrationRegistry {
    pub fn resolve(&self, id: CalibrationId) -> CalibrationFunction {
        resolve(id)
    }

    pub fn resolve_code(&self, code: u8) -> CalibrationFunction {
        resolve(CalibrationId::from_code(code))
    }

    pub fn resolve_name(&self, name: &str) -> CalibrationFunction {
        resolve(CalibrationId::from_name(name))
    }
}

pub fn resolve(id: CalibrationId) -> CalibrationFunction {
    CalibrationFunction {
        id,
        curve: id.curve(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        let tolerance = 1e-9 * expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected}, got {actual}"
        );
    }

    fn convert(id: CalibrationId, r: f64) -> f64 {
        resolve(id).apply(r).expect("value inside curve domain")
    }

    #[test]
    fn test_identity_law() {
        let identity = CalibrationRegistry.resolve(CalibrationId::NoConversion);
        assert!(identity.is_identity());
        for r in [0.0, -5.0, 1.5e-12, 123.456, 9.9e300] {
            assert_eq!(identity.apply(r), Ok(r));
        }
    }

    #[test]
    fn test_unknown_ids_pass_through() {
        assert_eq!(CalibrationId::from_code(21), CalibrationId::NoConversion);
        assert_eq!(CalibrationId::from_code(255), CalibrationId::NoConversion);
        assert_eq!(CalibrationId::from_name("RuOx-9000"), CalibrationId::NoConversion);
        assert!(CalibrationRegistry.resolve_code(99).is_identity());
    }

    #[test]
    fn test_codes_round_trip() {
        for code in 0..=20u8 {
            assert_eq!(CalibrationId::from_code(code).code(), code);
        }
        assert_eq!(CalibrationId::Rf100.code(), 17);
        assert_eq!(CalibrationId::A8.code(), 20);
    }

    #[test]
    fn test_names_resolve() {
        assert_eq!(CalibrationId::from_name("RF100"), CalibrationId::Rf100);
        assert_eq!(CalibrationId::from_name("rf100"), CalibrationId::Rf100);
        assert_eq!(CalibrationId::from_name(" a8 "), CalibrationId::A8);
        assert_eq!(CalibrationId::from_name("no conv."), CalibrationId::NoConversion);
        assert_eq!(CalibrationId::from_name("SP special"), CalibrationId::SpSpecial);
    }

    #[test]
    fn test_selectable_menu_order() {
        let names: Vec<&str> = CalibrationId::SELECTABLE.iter().map(|id| id.name()).collect();
        assert_eq!(
            names,
            ["no conv.", "pt1000", "F", "G", "H", "N", "L", "M", "RF100", "MRDS", "AR3", "a8"]
        );
    }

    #[test]
    fn test_single_branch_curves() {
        assert_close(convert(CalibrationId::Pt1000, 1000.0), -225.90210202866692);
        assert_close(convert(CalibrationId::FHigh, 300.0), 410.7155872823115);
        assert_close(convert(CalibrationId::FLow, 150.0), 139.90991175083485);
        assert_close(convert(CalibrationId::Mrds, 1000.0), 102.62512316261487);
        assert_close(convert(CalibrationId::Ar3, 2000.0), 21607661.63624363);
        assert_close(convert(CalibrationId::A8, 2000.0), 24879172.455699705);
    }

    #[test]
    fn test_high_low_curves() {
        let cases = [
            (CalibrationId::F, 250.0, 295.41216135322315),
            (CalibrationId::F, 150.0, 139.90991175083485),
            (CalibrationId::G, 300.0, 379.8232245082087),
            (CalibrationId::G, 150.0, 137.84937073014822),
            (CalibrationId::H, 300.0, 360.5052223767893),
            (CalibrationId::H, 150.0, 129.88773421714814),
            (CalibrationId::N, 300.0, 354.41064080843773),
            (CalibrationId::N, 150.0, 109.85447881665885),
            (CalibrationId::L, 300.0, 370.85829092396136),
            (CalibrationId::L, 150.0, 107.41415230936647),
            (CalibrationId::M, 300.0, 338.16324913173753),
            (CalibrationId::M, 150.0, 99.66611222933491),
            (CalibrationId::Rf100, 200.0, 63.555556387228485),
            (CalibrationId::Rf100, 50.0, 0.00673396768762249),
        ];
        for (id, r, expected) in cases {
            assert_close(convert(id, r), expected);
        }
    }

    #[test]
    fn test_rf100_threshold_is_inclusive_high() {
        let high_at_90 = 6.365643612707626;
        let low_at_90 = 6.331087642054908;
        let t = convert(CalibrationId::Rf100, 90.0);
        assert_close(t, high_at_90);
        assert!((t - low_at_90).abs() > 1e-3);
        // just below the threshold uses the low fit
        assert_close(convert(CalibrationId::Rf100, 89.999), 6.330792228863967);
    }

    #[test]
    fn test_composite_matches_components_at_threshold() {
        assert_eq!(
            convert(CalibrationId::F, 199.8),
            convert(CalibrationId::FHigh, 199.8)
        );
        assert_eq!(
            convert(CalibrationId::N, 225.0),
            convert(CalibrationId::NLow, 225.0)
        );
    }

    #[test]
    fn test_sp_special_branches() {
        assert_close(convert(CalibrationId::SpSpecial, 8000.0), 292.60052613674446);
        assert_close(convert(CalibrationId::SpSpecial, 7000.0), 216.184471659848);
        // ln(500) < 6.58231, power law base would be negative
        assert!(resolve(CalibrationId::SpSpecial).apply(500.0).is_err());
    }

    #[test]
    fn test_domain_errors() {
        let err = resolve(CalibrationId::Rf100).apply(-5.0).unwrap_err();
        assert_eq!(
            err,
            CalibrationError::Domain {
                curve: CalibrationId::Rf100,
                input: -5.0
            }
        );
        assert!(resolve(CalibrationId::A8).apply(0.0).is_err());
        // below the 5.2 ohm lead offset
        assert!(resolve(CalibrationId::L).apply(5.0).is_err());
        assert!(resolve(CalibrationId::Mrds).apply(5.38).is_err());
        assert!(resolve(CalibrationId::H).apply(f64::NAN).is_err());
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Preset {
        calibration: CalibrationId,
    }

    #[test]
    fn test_serialized_by_name() {
        let preset = Preset {
            calibration: CalibrationId::Rf100,
        };
        let text = toml::to_string(&preset).expect("Failed to serialize");
        assert_eq!(text.trim(), r#"calibration = "RF100""#);

        let parsed: Preset = toml::from_str(r#"calibration = "bogus""#).expect("Failed to deserialize");
        assert_eq!(parsed.calibration, CalibrationId::NoConversion);
    }
}
