//! Unpacker for `eval(function(p,a,c,k,e,d){...})` packed scripts.
//!
//! The common shape passes the symbol table as a `'a|b|c'.split('|')`
//! literal and is decoded natively. Some hosts compute the table with a
//! nested function instead; that expression is evaluated in the script
//! sandbox. When neither parse works the whole block is evaluated with its
//! leading `eval` stripped, which makes the packer return its source.

use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::ResolveError;
use crate::js_engine::{ScriptEvaluator, evaluate_offloaded, evaluate_program_offloaded};

static PACKED_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eval\s*\(\s*function\s*\(\s*p\s*,\s*a\s*,\s*c\s*,\s*k\s*,\s*e\s*,\s*[rd]\s*\)")
        .unwrap()
});

static LITERAL_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\}\s*\(\s*'(.*)',\s*(\d+|\[\]),\s*(\d+),\s*'(.*?)'\.split\('\|'\)").unwrap()
});

static COMPUTED_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\}\s*\(\s*'(.*)',\s*(\d+|\[\]),\s*(\d+),\s*(.+),\s*\d+,\s*\{\}\s*\)\s*\)").unwrap()
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").unwrap());

const ALPHABET_62: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHABET_95: &str = r##" !"#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\]^_`abcdefghijklmnopqrstuvwxyz{|}~"##;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackedSymtab {
    Literal(Vec<String>),
    /// JS expression producing the symbol table.
    Computed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedScript {
    pub payload: String,
    pub radix: u32,
    pub count: usize,
    pub symtab: PackedSymtab,
}

pub fn is_packed(source: &str) -> bool {
    PACKED_START.is_match(source)
}

/// Every packed block in `source`, each running to the next block, the end
/// of its `<script>` element, or the end of input.
pub fn find_packed_scripts(source: &str) -> Vec<&str> {
    let starts: Vec<usize> = PACKED_START.find_iter(source).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(source.len());
            let block = &source[start..end];
            match block.find("</script>") {
                Some(close) => &block[..close],
                None => block,
            }
        })
        .collect()
}

fn parse_radix(raw: &str) -> Option<u32> {
    if raw == "[]" { Some(62) } else { raw.parse().ok() }
}

pub fn parse_packed(block: &str) -> Result<PackedScript, ResolveError> {
    if let Some(caps) = LITERAL_ARGS.captures(block)
        && let Some(radix) = parse_radix(&caps[2])
        && let Ok(count) = caps[3].parse::<usize>()
    {
        return Ok(PackedScript {
            payload: caps[1].to_string(),
            radix,
            count,
            symtab: PackedSymtab::Literal(caps[4].split('|').map(str::to_string).collect()),
        });
    }

    if let Some(caps) = COMPUTED_ARGS.captures(block)
        && let Some(radix) = parse_radix(&caps[2])
        && let Ok(count) = caps[3].parse::<usize>()
    {
        return Ok(PackedScript {
            payload: caps[1].to_string(),
            radix,
            count,
            symtab: PackedSymtab::Computed(caps[4].trim().to_string()),
        });
    }

    Err(ResolveError::format("unrecognised packer argument layout"))
}

fn digit_value(alphabet: &str, ch: char) -> Option<u64> {
    alphabet.chars().position(|c| c == ch).map(|p| p as u64)
}

/// Decode `word` as written by the packer's `e(c)` encoder in `radix`.
fn unbase(radix: u32, word: &str) -> Option<u64> {
    match radix {
        // The encoder emits lowercase below 36, so `A` is never a digit there.
        2..=62 => dict_convert(radix, word, ALPHABET_62),
        63..=95 => dict_convert(radix, word, ALPHABET_95),
        _ => None,
    }
}

fn dict_convert(radix: u32, word: &str, alphabet: &str) -> Option<u64> {
    let mut value: u64 = 0;
    for (i, ch) in word.chars().rev().enumerate() {
        let digit = digit_value(alphabet, ch)?;
        if digit >= radix as u64 {
            return None;
        }
        let place = (radix as u64).checked_pow(i as u32)?;
        value = value.checked_add(place.checked_mul(digit)?)?;
    }
    Some(value)
}

/// Substitute every token of `payload` with its symbol. Tokens that decode
/// past the table, or map to an empty slot, stay as written.
pub fn substitute(payload: &str, radix: u32, symtab: &[String]) -> String {
    let payload = payload.replace("\\\\", "\\").replace("\\'", "'");
    WORD.replace_all(&payload, |caps: &Captures| {
        let word = &caps[0];
        unbase(radix, word)
            .and_then(|idx| symtab.get(idx as usize))
            .filter(|sym| !sym.is_empty())
            .cloned()
            .unwrap_or_else(|| word.to_string())
    })
    .into_owned()
}

/// Unpack a block whose symbol table is a literal, without a script engine.
pub fn unpack_native(block: &str) -> Result<String, ResolveError> {
    let script = parse_packed(block)?;
    match &script.symtab {
        PackedSymtab::Literal(symtab) => {
            if symtab.len() != script.count {
                debug!(count = script.count, symbols = symtab.len(), "packer count mismatch");
            }
            Ok(substitute(&script.payload, script.radix, symtab))
        }
        PackedSymtab::Computed(_) => Err(ResolveError::format(
            "packer symbol table is computed by script",
        )),
    }
}

/// Unpack one block, falling back to the script sandbox when needed.
pub async fn unpack(
    block: &str,
    evaluator: Option<Arc<dyn ScriptEvaluator>>,
) -> Result<String, ResolveError> {
    let parsed = parse_packed(block);
    if let Ok(PackedScript {
        payload,
        radix,
        symtab: PackedSymtab::Literal(symtab),
        ..
    }) = &parsed
    {
        return Ok(substitute(payload, *radix, symtab));
    }

    let evaluator = evaluator.ok_or(ResolveError::ScriptUnavailable)?;

    if let Ok(PackedScript {
        payload,
        radix,
        symtab: PackedSymtab::Computed(expression),
        ..
    }) = &parsed
    {
        let function_source = format!(
            "function(_) {{ var __s = ({expression}); return Array.isArray(__s) ? __s.join('|') : String(__s); }}"
        );
        match evaluate_offloaded(evaluator.clone(), function_source, String::new()).await {
            Ok(joined) => {
                let symtab: Vec<String> = joined.split('|').map(str::to_string).collect();
                return Ok(substitute(payload, *radix, &symtab));
            }
            Err(e) => debug!(error = %e, "computed symbol table failed, evaluating whole block"),
        }
    }

    let expression = block.trim().trim_end_matches(';').replacen("eval", "", 1);
    let unpacked = evaluate_program_offloaded(evaluator, String::new(), expression).await?;
    if unpacked.is_empty() {
        return Err(ResolveError::format("packed block evaluated to nothing"));
    }
    Ok(unpacked)
}

/// Unpack every block in `source` and join the results with newlines.
/// Blocks that fail are skipped.
pub async fn unpack_all(source: &str, evaluator: Option<Arc<dyn ScriptEvaluator>>) -> String {
    let mut out = Vec::new();
    for block in find_packed_scripts(source) {
        match unpack(block, evaluator.clone()).await {
            Ok(unpacked) => out.push(unpacked),
            Err(e) => debug!(error = %e, "skipping packed block"),
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js_engine::JsError;

    const SIMPLE: &str = "eval(function(p,a,c,k,e,r){e=String;if(!''.replace(/^/,String)){while(c--)r[c]=k[c]||c;k=[function(e){return r[e]}];e=function(){return'\\\\w+'};c=1};while(c--)if(k[c])p=p.replace(new RegExp('\\\\b'+e(c)+'\\\\b','g'),k[c]);return p}('1 0=2;3(0)',4,4,'x|var|5|alert'.split('|'),0,{}))";

    fn base62_block() -> String {
        let mut symtab: Vec<String> = (0..63).map(|_| String::new()).collect();
        symtab[61] = "player".into();
        symtab[62] = "setup".into();
        format!(
            "eval(function(p,a,c,k,e,d){{while(c--)if(k[c])p=p.replace(new RegExp('\\\\b'+c.toString(a)+'\\\\b','g'),k[c]);return p}}('Z().10({{file:\\'x\\'}})',62,63,'{}'.split('|'),0,{{}}))",
            symtab.join("|")
        )
    }

    #[test]
    fn test_detects_and_unpacks_literal_table() {
        assert!(is_packed(SIMPLE));
        assert_eq!(unpack_native(SIMPLE).unwrap(), "var x=5;alert(x)");
    }

    #[test]
    fn test_base62_uses_positional_powers() {
        // "10" in base 62 is 62, "Z" is 61.
        assert_eq!(unbase(62, "10"), Some(62));
        assert_eq!(unbase(62, "Z"), Some(61));
        assert_eq!(unbase(95, "!!"), Some(96));
        assert_eq!(unpack_native(&base62_block()).unwrap(), "player().setup({file:'x'})");
    }

    #[test]
    fn test_uppercase_is_not_a_digit_below_base_37() {
        assert_eq!(unbase(36, "z"), Some(35));
        assert_eq!(unbase(36, "Z"), None);
        assert_eq!(unbase(16, "ff"), Some(255));
        assert_eq!(unbase(16, "FF"), None);
        // Uppercase words in a low-radix payload are left untouched.
        let symtab = vec!["zero".to_string(); 16];
        assert_eq!(substitute("A+a", 16, &symtab), "A+zero");
    }

    #[test]
    fn test_find_packed_scripts_splits_blocks() {
        let page = format!(
            "<script>var a=1;</script><script>{SIMPLE}</script><p>x</p><script>{}</script>",
            base62_block()
        );
        let blocks = find_packed_scripts(&page);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], SIMPLE);
    }

    #[tokio::test]
    async fn test_unpack_all_skips_unparseable_blocks() {
        let page = format!("{SIMPLE}\n<script>eval(function(p,a,c,k,e,d){{return p}}(oops))</script>");
        assert_eq!(unpack_all(&page, None).await, "var x=5;alert(x)");
    }

    struct FixedTable;

    impl ScriptEvaluator for FixedTable {
        fn evaluate(&self, function_source: &str, _arg: &str) -> Result<String, JsError> {
            assert!(function_source.contains("(function(){ return tbl(); })()"));
            Ok("x|var|5|alert".into())
        }
    }

    const COMPUTED: &str = "eval(function(p,a,c,k,e,d){return p}('1 0=2;3(0)',4,4,(function(){ return tbl(); })(),0,{}))";

    #[tokio::test]
    async fn test_computed_table_goes_through_evaluator() {
        assert!(matches!(
            parse_packed(COMPUTED).unwrap().symtab,
            PackedSymtab::Computed(_)
        ));
        let out = unpack(COMPUTED, Some(Arc::new(FixedTable))).await.unwrap();
        assert_eq!(out, "var x=5;alert(x)");
    }

    #[tokio::test]
    async fn test_computed_table_without_engine() {
        let err = unpack(COMPUTED, None).await.unwrap_err();
        assert!(matches!(err, ResolveError::ScriptUnavailable));
    }

    #[cfg(feature = "rquickjs")]
    #[tokio::test]
    async fn test_computed_table_in_quickjs() {
        let block = "eval(function(p,a,c,k,e,d){while(c--)if(k[c])p=p.replace(new RegExp('\\\\b'+c.toString(a)+'\\\\b','g'),k[c]);return p}('1 0=2;3(0)',4,4,(function(){ return ['x','var','5','alert']; })(),0,{}))";
        let evaluator: Arc<dyn ScriptEvaluator> = Arc::new(crate::js_engine::QuickJsEvaluator::new());
        let out = unpack(block, Some(evaluator)).await.unwrap();
        assert_eq!(out, "var x=5;alert(x)");
    }
}
