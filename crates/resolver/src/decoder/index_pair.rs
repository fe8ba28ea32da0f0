//! Password extraction from a ciphertext with an embedded key.
//!
//! Hosts splice the passphrase into the base64 ciphertext at positions
//! published as `(offset, length)` pairs. For pair `i` the slice starts at
//! `offset_i + sum(length_0..length_{i-1})`, measured on the original string.
//! The extracted characters are concatenated into the password and the
//! ciphertext is whatever remains once every slice has been removed.

use crate::error::ResolveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCiphertext {
    pub ciphertext: String,
    pub password: String,
}

pub fn split_index_pairs(
    ciphertext: &str,
    pairs: &[(usize, usize)],
) -> Result<SplitCiphertext, ResolveError> {
    let chars: Vec<char> = ciphertext.chars().collect();
    let mut taken = vec![false; chars.len()];
    let mut password = String::new();
    let mut consumed = 0usize;

    for &(offset, length) in pairs {
        let start = offset + consumed;
        let end = start + length;
        if end > chars.len() {
            return Err(ResolveError::format(format!(
                "index pair ({offset}, {length}) reaches {end} past ciphertext length {}",
                chars.len()
            )));
        }
        for position in start..end {
            if taken[position] {
                return Err(ResolveError::format(format!(
                    "index pair ({offset}, {length}) overlaps an earlier slice at {position}"
                )));
            }
            taken[position] = true;
            password.push(chars[position]);
        }
        consumed += length;
    }

    let ciphertext = chars
        .iter()
        .zip(&taken)
        .filter(|(_, taken)| !**taken)
        .map(|(c, _)| *c)
        .collect();

    Ok(SplitCiphertext {
        ciphertext,
        password,
    })
}

/// Parse a JSON index table like `[[54,6],[85,6]]`.
pub fn parse_index_pairs(json: &str) -> Result<Vec<(usize, usize)>, ResolveError> {
    let raw: Vec<Vec<u64>> = serde_json::from_str(json)?;
    raw.into_iter()
        .map(|pair| match pair.as_slice() {
            [offset, length] => Ok((*offset as usize, *length as usize)),
            other => Err(ResolveError::format(format!(
                "index pair must have two elements, got {}",
                other.len()
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Captured from a live megacloud embed together with its key table.
    const MEGACLOUD_PAIRS: [(usize, usize); 7] =
        [(54, 6), (85, 6), (100, 6), (101, 6), (106, 7), (134, 7), (156, 6)];
    const MEGACLOUD_ENCRYPTED: &str = "U2FsdGVkX19A5ALyV8svWKkUjszjAf9X0H8EtnLgE++xbOtdodmq0udf4XgJottZ+S8yCPC/xggYMwx03zsQpp29M2Z5TKDwYhe5MM46qZlwLvzjrM25gG9uAz1kNSdrkzMmgaQOkwpQkF5ZeLKq564aV6ahlqv5Hx/yG4yZZniYu1IJdXCR5DZ9x3KT/qvvWWGlRS8kzJGLBnjHJj0f2NzptDHnYy/oDgKWRbCgjsap8eM8/Rk096AXDIoSMKrATsxZrvf4MiTOF6CzPRZQffLn1/KDVLN1PsTkr1BgifI8hmyA+UqSBgH7iFD8ds8OZMLyjqTYrOuTf8NRiY/CYRlPgX2ANC2vPDvXA6gMY1QlRuLJ8aCxFCggNSOrfG/chaLhOCFrd0+VxXqDfUWcxwQec5LtYHKP067N5F4siCLmjh3bs6TS1+x7ZFokFTQylZ0yHvTMD56Ldu0J1TSEOYV73hipy/U74PSrnMAQ8j6r4jdGE1Y53QHNwzwrQGTfUg==";
    const MEGACLOUD_PASSWORD: &str = "df4XgJ5TKDwYrM25gGuAz1kNMmgaQOk4yZZniYGlRS8k";
    const MEGACLOUD_DATA: &str = "U2FsdGVkX19A5ALyV8svWKkUjszjAf9X0H8EtnLgE++xbOtdodmq0uottZ+S8yCPC/xggYMwx03zsQpp29M2Zhe5MM46qZlwLvzj9SdrkzwpQkF5ZeLKq564aV6ahlqv5Hx/yGu1IJdXCR5DZ9x3KT/qvvWWzJGLBnjHJj0f2NzptDHnYy/oDgKWRbCgjsap8eM8/Rk096AXDIoSMKrATsxZrvf4MiTOF6CzPRZQffLn1/KDVLN1PsTkr1BgifI8hmyA+UqSBgH7iFD8ds8OZMLyjqTYrOuTf8NRiY/CYRlPgX2ANC2vPDvXA6gMY1QlRuLJ8aCxFCggNSOrfG/chaLhOCFrd0+VxXqDfUWcxwQec5LtYHKP067N5F4siCLmjh3bs6TS1+x7ZFokFTQylZ0yHvTMD56Ldu0J1TSEOYV73hipy/U74PSrnMAQ8j6r4jdGE1Y53QHNwzwrQGTfUg==";

    #[test]
    fn test_captured_megacloud_sample() {
        let split = split_index_pairs(MEGACLOUD_ENCRYPTED, &MEGACLOUD_PAIRS).unwrap();
        assert_eq!(split.password, MEGACLOUD_PASSWORD);
        assert_eq!(split.ciphertext, MEGACLOUD_DATA);
    }

    #[test]
    fn test_short_example_uses_cumulative_offsets() {
        // Second slice starts at 3 + 2 on the original string.
        let split = split_index_pairs("ABCDEFGHIJ", &[(0, 2), (3, 2)]).unwrap();
        assert_eq!(split.password, "ABFG");
        assert_eq!(split.ciphertext, "CDEHIJ");
    }

    #[test]
    fn test_out_of_range_pair_is_format_error() {
        let err = split_index_pairs("ABCDEFGHIJ", &[(0, 2), (7, 2)]).unwrap_err();
        assert!(matches!(err, ResolveError::Format(_)));
    }

    #[test]
    fn test_overlapping_pair_is_format_error() {
        // Second slice would start at 0 + 3 = 3, inside the first.
        let err = split_index_pairs("ABCDEFGHIJ", &[(2, 3), (0, 2)]).unwrap_err();
        assert!(matches!(err, ResolveError::Format(_)));
    }

    #[test]
    fn test_parse_index_pairs() {
        assert_eq!(
            parse_index_pairs("[[54,6],[85,6]]").unwrap(),
            vec![(54, 6), (85, 6)]
        );
        assert!(matches!(
            parse_index_pairs("[[1,2,3]]"),
            Err(ResolveError::Format(_))
        ));
        assert!(parse_index_pairs("{\"not\":\"pairs\"}").is_err());
    }
}
