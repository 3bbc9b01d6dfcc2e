//! 模型输出的 JSON 修复
//!
//! 每个修复步骤都是独立的 `&str -> String` 纯函数，按固定顺序组成列表。
//! 新的异常格式只需要加一个步骤，不用改解析流程。

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// 一个具名的修复步骤
#[derive(Clone, Copy)]
pub struct RepairPass {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

impl std::fmt::Debug for RepairPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RepairPass").field(&self.name).finish()
    }
}

/// 严格解析失败后依次应用的语法修复
pub const SYNTAX_PASSES: &[RepairPass] = &[
    RepairPass {
        name: "remove_trailing_commas",
        apply: remove_trailing_commas,
    },
    RepairPass {
        name: "quote_bare_keys",
        apply: quote_bare_keys,
    },
    RepairPass {
        name: "single_to_double_quotes",
        apply: single_to_double_quotes,
    },
];

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());
static LEADING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*```(?:json)?").unwrap());
static TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```\s*$").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());
static BARE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([{,]\s*)(\w+):").unwrap());
static SINGLE_QUOTED_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r":\s*'([^']*)'").unwrap());
static OBJECT_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[\s\S]*\}").unwrap());

/// 去掉一层 markdown 代码块
///
/// 成对的代码块取其内容；不成对时开头和结尾的围栏各自去掉，
/// 输出被截断、缺少收尾围栏也能解析。
pub fn strip_code_fence(text: &str) -> String {
    if let Some(inner) = CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().to_string();
    }
    let text = LEADING_FENCE.replace(text, "");
    TRAILING_FENCE.replace(&text, "").trim().to_string()
}

/// 还原转义过的换行和引号
pub fn unescape(text: &str) -> String {
    text.replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\'", "'")
}

/// `,}` / `,]` → `}` / `]`
pub fn remove_trailing_commas(text: &str) -> String {
    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

/// `{key:` → `{"key":`
pub fn quote_bare_keys(text: &str) -> String {
    BARE_KEY.replace_all(text, r#"$1"$2":"#).into_owned()
}

/// `: 'value'` → `: "value"`
pub fn single_to_double_quotes(text: &str) -> String {
    SINGLE_QUOTED_VALUE
        .replace_all(text, r#": "$1""#)
        .into_owned()
}

/// 文本中第一个 `{` 到最后一个 `}` 之间的内容
pub fn first_object_span(text: &str) -> Option<&str> {
    OBJECT_SPAN.find(text).map(|m| m.as_str())
}

/// 先严格解析，失败后应用全部语法修复再解析一次
pub fn parse_lenient(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    let repaired = SYNTAX_PASSES
        .iter()
        .fold(text.to_string(), |acc, pass| (pass.apply)(&acc));

    match serde_json::from_str(&repaired) {
        Ok(value) => {
            debug!(
                "修复后解析成功 ({})",
                SYNTAX_PASSES
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(" → ")
            );
            Some(value)
        }
        Err(_) => None,
    }
}
