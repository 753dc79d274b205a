/// Render `value` with a B / M / K suffix, eg/ `1_234_567.0` -> `"1.23M"`.
///
/// Billions & millions keep two decimals, thousands one, and smaller values none.
pub fn compact_number(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1_000_000_000.0 {
        format!("{:.2}B", value / 1_000_000_000.0)
    } else if magnitude >= 1_000_000.0 {
        format!("{:.2}M", value / 1_000_000.0)
    } else if magnitude >= 1_000.0 {
        format!("{:.1}K", value / 1_000.0)
    } else {
        format!("{value:.0}")
    }
}

/// Render a fraction as a percentage, eg/ `0.0123` with 2 decimals -> `"1.23%"`.
pub fn percent(fraction: f64, decimals: usize) -> String {
    format!("{:.*}%", decimals, fraction * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_number() {
        struct TestCase {
            input: f64,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0
                input: 2_340_000_000.0,
                expected: "2.34B",
            },
            TestCase {
                // TC1
                input: 1_234_567.0,
                expected: "1.23M",
            },
            TestCase {
                // TC2
                input: 45_678.0,
                expected: "45.7K",
            },
            TestCase {
                // TC3
                input: 999.4,
                expected: "999",
            },
            TestCase {
                // TC4: sign kept, suffix chosen on magnitude
                input: -3_200_000.0,
                expected: "-3.20M",
            },
            TestCase {
                // TC5
                input: 0.0,
                expected: "0",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = compact_number(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.44, 2), "44.00%");
        assert_eq!(percent(0.0123, 1), "1.2%");
        assert_eq!(percent(-0.5, 0), "-50%");
    }
}
