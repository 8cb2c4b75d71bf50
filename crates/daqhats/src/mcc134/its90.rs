//! ITS-90 thermocouple reference functions.
//!
//! Temperature to voltage uses the NIST reference polynomials (°C in, mV
//! out). Voltage to temperature inverts them by bisection, so the two
//! directions agree to well under a millidegree.

#![allow(clippy::excessive_precision)]

use super::TcType;

/// One polynomial segment, valid up to `upper` °C.
struct Segment {
    upper: f64,
    coefficients: &'static [f64],
}

/// Type K adds `A0 * exp(A1 * (t - A2)^2)` above 0 °C.
const K_EXPONENTIAL: [f64; 3] = [0.118597600000E+00, -0.118343200000E-03, 0.126968600000E+03];

struct Table {
    /// Lowest temperature of the reference function
    min: f64,
    /// Lowest temperature the inverse searches; above any turning point
    inverse_min: f64,
    max: f64,
    segments: &'static [Segment],
    exponential: bool,
}

const TYPE_J: Table = Table {
    min: -210.0,
    inverse_min: -210.0,
    max: 1200.0,
    segments: &[
        Segment {
            upper: 760.0,
            coefficients: &[
                0.0,
                0.503811878150E-01,
                0.304758369300E-04,
                -0.856810657200E-07,
                0.132281952950E-09,
                -0.170529583370E-12,
                0.209480906970E-15,
                -0.125383953360E-18,
                0.156317256970E-22,
            ],
        },
        Segment {
            upper: 1200.0,
            coefficients: &[
                0.296456256810E+03,
                -0.149761277860E+01,
                0.317871039240E-02,
                -0.318476867010E-05,
                0.157208190040E-08,
                -0.306913690560E-12,
            ],
        },
    ],
    exponential: false,
};

const TYPE_K: Table = Table {
    min: -270.0,
    inverse_min: -270.0,
    max: 1372.0,
    segments: &[
        Segment {
            upper: 0.0,
            coefficients: &[
                0.0,
                0.394501280250E-01,
                0.236223735980E-04,
                -0.328589067840E-06,
                -0.499048287770E-08,
                -0.675090591730E-10,
                -0.574103274280E-12,
                -0.310888728940E-14,
                -0.104516093650E-16,
                -0.198892668780E-19,
                -0.163226974860E-22,
            ],
        },
        Segment {
            upper: 1372.0,
            coefficients: &[
                -0.176004136860E-01,
                0.389212049750E-01,
                0.185587700320E-04,
                -0.994575928740E-07,
                0.318409457190E-09,
                -0.560728448890E-12,
                0.560750590590E-15,
                -0.320207200030E-18,
                0.971511471520E-22,
                -0.121047212750E-25,
            ],
        },
    ],
    exponential: true,
};

const TYPE_T: Table = Table {
    min: -270.0,
    inverse_min: -270.0,
    max: 400.0,
    segments: &[
        Segment {
            upper: 0.0,
            coefficients: &[
                0.0,
                0.387481063640E-01,
                0.441944343470E-04,
                0.118443231050E-06,
                0.200329735540E-07,
                0.901380195590E-09,
                0.226511565930E-10,
                0.360711542050E-12,
                0.384939398830E-14,
                0.282135219250E-16,
                0.142515947790E-18,
                0.487686622860E-21,
                0.107955392700E-23,
                0.139450270620E-26,
                0.797951539270E-30,
            ],
        },
        Segment {
            upper: 400.0,
            coefficients: &[
                0.0,
                0.387481063640E-01,
                0.332922278800E-04,
                0.206182434040E-06,
                -0.218822568460E-08,
                0.109968809280E-10,
                -0.308157587720E-13,
                0.454791352900E-16,
                -0.275129016730E-19,
            ],
        },
    ],
    exponential: false,
};

const TYPE_E: Table = Table {
    min: -270.0,
    inverse_min: -270.0,
    max: 1000.0,
    segments: &[
        Segment {
            upper: 0.0,
            coefficients: &[
                0.0,
                0.586655087080E-01,
                0.454109771240E-04,
                -0.779980486860E-06,
                -0.258001608430E-07,
                -0.594525830570E-09,
                -0.932140586670E-11,
                -0.102876055340E-12,
                -0.803701236210E-15,
                -0.439794973910E-17,
                -0.164147763550E-19,
                -0.396736195160E-22,
                -0.558273287210E-25,
                -0.346578420130E-28,
            ],
        },
        Segment {
            upper: 1000.0,
            coefficients: &[
                0.0,
                0.586655087100E-01,
                0.450322755820E-04,
                0.289084072120E-07,
                -0.330568966520E-09,
                0.650244032700E-12,
                -0.191974955040E-15,
                -0.125366004970E-17,
                0.214892175690E-20,
                -0.143880417820E-23,
                0.359608994810E-27,
            ],
        },
    ],
    exponential: false,
};

const TYPE_R: Table = Table {
    min: -50.0,
    inverse_min: -50.0,
    max: 1768.1,
    segments: &[
        Segment {
            upper: 1064.18,
            coefficients: &[
                0.0,
                0.528961729765E-02,
                0.139166589782E-04,
                -0.238855693017E-07,
                0.356916001063E-10,
                -0.462347666298E-13,
                0.500777441034E-16,
                -0.373105886191E-19,
                0.157716482367E-22,
                -0.281038625251E-26,
            ],
        },
        Segment {
            upper: 1664.5,
            coefficients: &[
                0.295157925316E+01,
                -0.252061251332E-02,
                0.159564501865E-04,
                -0.764085947576E-08,
                0.205305291024E-11,
                -0.293359668173E-15,
            ],
        },
        Segment {
            upper: 1768.1,
            coefficients: &[
                0.152232118209E+03,
                -0.268819888545E+00,
                0.171280280471E-03,
                -0.345895706453E-07,
                -0.934633971046E-14,
            ],
        },
    ],
    exponential: false,
};

const TYPE_S: Table = Table {
    min: -50.0,
    inverse_min: -50.0,
    max: 1768.1,
    segments: &[
        Segment {
            upper: 1064.18,
            coefficients: &[
                0.0,
                0.540313308631E-02,
                0.125934289740E-04,
                -0.232477968689E-07,
                0.322028823036E-10,
                -0.331465196389E-13,
                0.255744251786E-16,
                -0.125068871393E-19,
                0.271443176145E-23,
            ],
        },
        Segment {
            upper: 1664.5,
            coefficients: &[
                0.132900444085E+01,
                0.334509311344E-02,
                0.654805192818E-05,
                -0.164856259209E-08,
                0.129989605174E-13,
            ],
        },
        Segment {
            upper: 1768.1,
            coefficients: &[
                0.146628232636E+03,
                -0.258430516752E+00,
                0.163693574641E-03,
                -0.330439046987E-07,
                -0.943223690612E-14,
            ],
        },
    ],
    exponential: false,
};

// Output dips below zero up to 21 °C, so low readings are ambiguous.
const TYPE_B: Table = Table {
    min: 0.0,
    inverse_min: 21.0,
    max: 1820.0,
    segments: &[
        Segment {
            upper: 630.615,
            coefficients: &[
                0.0,
                -0.246508183460E-03,
                0.590404211710E-05,
                -0.132579316360E-08,
                0.156682919010E-11,
                -0.169445292400E-14,
                0.629903470940E-18,
            ],
        },
        Segment {
            upper: 1820.0,
            coefficients: &[
                -0.389381686210E+01,
                0.285717474700E-01,
                -0.848851047850E-04,
                0.157852801640E-06,
                -0.168353448640E-09,
                0.111097940130E-12,
                -0.445154310330E-16,
                0.989756408210E-20,
                -0.937913302890E-24,
            ],
        },
    ],
    exponential: false,
};

const TYPE_N: Table = Table {
    min: -270.0,
    inverse_min: -270.0,
    max: 1300.0,
    segments: &[
        Segment {
            upper: 0.0,
            coefficients: &[
                0.0,
                0.261591059620E-01,
                0.109574842280E-04,
                -0.938411115540E-07,
                -0.464120397590E-10,
                -0.263033577160E-11,
                -0.226534380030E-13,
                -0.760893007910E-16,
                -0.934196678350E-19,
            ],
        },
        Segment {
            upper: 1300.0,
            coefficients: &[
                0.0,
                0.259293946010E-01,
                0.157101418800E-04,
                0.438256272370E-07,
                -0.252611697940E-09,
                0.643118193390E-12,
                -0.100634715190E-14,
                0.997453389920E-18,
                -0.608632456070E-21,
                0.208492293390E-24,
                -0.306821961510E-28,
            ],
        },
    ],
    exponential: false,
};

/// Bisection stops once the bracket is this narrow, °C.
const INVERSE_TOLERANCE: f64 = 1e-6;

impl TcType {
    fn table(self) -> Option<&'static Table> {
        match self {
            TcType::J => Some(&TYPE_J),
            TcType::K => Some(&TYPE_K),
            TcType::T => Some(&TYPE_T),
            TcType::E => Some(&TYPE_E),
            TcType::R => Some(&TYPE_R),
            TcType::S => Some(&TYPE_S),
            TcType::B => Some(&TYPE_B),
            TcType::N => Some(&TYPE_N),
            TcType::Disabled => None,
        }
    }
}

impl Table {
    fn millivolts(&self, celsius: f64) -> f64 {
        let segment = self
            .segments
            .iter()
            .find(|segment| celsius <= segment.upper)
            .unwrap_or(&self.segments[self.segments.len() - 1]);
        let mut mv = segment
            .coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * celsius + c);
        if self.exponential && celsius > 0.0 {
            let [a0, a1, a2] = K_EXPONENTIAL;
            mv += a0 * (a1 * (celsius - a2).powi(2)).exp();
        }
        mv
    }
}

/// Thermocouple output in mV at `celsius`, referenced to 0 °C.
///
/// `None` for a disabled channel or a temperature outside the type's
/// reference range.
pub fn voltage(tc_type: TcType, celsius: f64) -> Option<f64> {
    let table = tc_type.table()?;
    (table.min..=table.max)
        .contains(&celsius)
        .then(|| table.millivolts(celsius))
}

/// Temperature in °C for a 0 °C-referenced output of `millivolts`.
///
/// `None` for a disabled channel or a voltage outside the type's range.
pub fn temperature(tc_type: TcType, millivolts: f64) -> Option<f64> {
    let table = tc_type.table()?;
    let (mut low, mut high) = (table.inverse_min, table.max);
    if !(table.millivolts(low)..=table.millivolts(high)).contains(&millivolts) {
        return None;
    }
    while high - low > INVERSE_TOLERANCE {
        let mid = 0.5 * (low + high);
        if table.millivolts(mid) < millivolts {
            low = mid;
        } else {
            high = mid;
        }
    }
    Some(0.5 * (low + high))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points from the NIST ITS-90 tables, °C and mV.
    const REFERENCE: &[(TcType, f64, f64)] = &[
        (TcType::J, -200.0, -7.890),
        (TcType::J, 100.0, 5.269),
        (TcType::J, 1000.0, 57.953),
        (TcType::K, -100.0, -3.554),
        (TcType::K, 100.0, 4.096),
        (TcType::K, 1000.0, 41.276),
        (TcType::T, -200.0, -5.603),
        (TcType::T, 100.0, 4.279),
        (TcType::E, 100.0, 6.319),
        (TcType::E, 1000.0, 76.373),
        (TcType::R, 1000.0, 10.506),
        (TcType::R, 1700.0, 20.222),
        (TcType::S, 1000.0, 9.587),
        (TcType::S, 1500.0, 15.582),
        (TcType::B, 1000.0, 4.834),
        (TcType::B, 1800.0, 13.591),
        (TcType::N, 100.0, 2.774),
        (TcType::N, 1000.0, 36.256),
    ];

    #[test]
    fn test_voltage_matches_reference_tables() {
        for &(tc_type, celsius, mv) in REFERENCE {
            let got = voltage(tc_type, celsius).unwrap();
            assert!((got - mv).abs() < 0.001, "{tc_type:?} at {celsius}: {got} mV");
        }
    }

    #[test]
    fn test_temperature_matches_reference_tables() {
        for &(tc_type, celsius, mv) in REFERENCE {
            let got = temperature(tc_type, mv).unwrap();
            // one table digit is worth up to ~0.2 °C on the noble-metal types
            assert!((got - celsius).abs() < 0.2, "{tc_type:?} at {mv} mV: {got} °C");
        }
    }

    #[test]
    fn test_inverse_agrees_with_forward() {
        for tc_type in [TcType::J, TcType::K, TcType::T, TcType::E, TcType::N] {
            for celsius in [-150.0, -20.0, 0.0, 25.0, 200.0] {
                let mv = voltage(tc_type, celsius).unwrap();
                let back = temperature(tc_type, mv).unwrap();
                assert!((back - celsius).abs() < 1e-3, "{tc_type:?} {celsius}: {back}");
            }
        }
    }

    #[test]
    fn test_segments_join() {
        // no step at 0 °C where Type K picks up its exponential term
        let below = voltage(TcType::K, -1e-9).unwrap();
        let above = voltage(TcType::K, 1e-9).unwrap();
        assert!((above - below).abs() < 1e-6);
        assert_eq!(voltage(TcType::J, 0.0), Some(0.0));
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(voltage(TcType::T, 401.0), None);
        assert_eq!(voltage(TcType::R, -60.0), None);
        assert_eq!(temperature(TcType::T, 25.0), None);
        assert_eq!(temperature(TcType::K, -7.0), None);
        assert_eq!(voltage(TcType::Disabled, 25.0), None);
        assert_eq!(temperature(TcType::Disabled, 1.0), None);
    }
}
