use crate::error::{AppError, AppResult};

pub const MAX_CONTENT_LEN: usize = 10_000;
pub const MAX_TITLE_LEN: usize = 200;

const SENSITIVE_WORDS: &[&str] = &[
    "违禁词1", "违禁词2", "违禁词3", "垃圾信息", "广告", "违法", "暴力", "色情",
];

/// 内容中出现的敏感词，按词表顺序去重
pub fn find_sensitive_words(content: &str) -> Vec<&'static str> {
    let lowered = content.to_lowercase();
    SENSITIVE_WORDS
        .iter()
        .copied()
        .filter(|word| lowered.contains(&word.to_lowercase()))
        .collect()
}

/// 把敏感词替换为 ***
pub fn mask_sensitive_words(content: &str) -> String {
    SENSITIVE_WORDS
        .iter()
        .fold(content.to_string(), |acc, word| acc.replace(word, "***"))
}

pub fn validate_content(content: &str, min_len: usize, max_len: usize) -> AppResult<()> {
    if content.trim().chars().count() < min_len {
        return Err(AppError::bad_request(format!("内容不能少于{}个字符", min_len)));
    }
    if content.chars().count() > max_len {
        return Err(AppError::bad_request(format!("内容不能超过{}个字符", max_len)));
    }
    let found = find_sensitive_words(content);
    if !found.is_empty() {
        return Err(AppError::bad_request(format!("内容包含敏感词：{}", found.join(", "))));
    }
    Ok(())
}

pub fn validate_body(content: &str) -> AppResult<()> {
    validate_content(content, 1, MAX_CONTENT_LEN)
}

pub fn validate_title(title: &str) -> AppResult<()> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("标题不能为空"));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::bad_request(format!("标题不能超过{}个字符", MAX_TITLE_LEN)));
    }
    validate_content(trimmed, 1, MAX_TITLE_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_and_oversized() {
        assert!(validate_body("   ").is_err());
        assert!(validate_body("").is_err());
        let long = "字".repeat(MAX_CONTENT_LEN + 1);
        assert!(validate_body(&long).is_err());
        let exact = "字".repeat(MAX_CONTENT_LEN);
        assert!(validate_body(&exact).is_ok());
    }

    #[test]
    fn names_sensitive_words_found() {
        let err = validate_body("这里有广告和暴力内容").unwrap_err();
        assert_eq!(err.to_string(), "内容包含敏感词：广告, 暴力");
    }

    #[test]
    fn masks_words() {
        assert_eq!(mask_sensitive_words("不要发广告"), "不要发***");
    }

    #[test]
    fn title_limits() {
        assert!(validate_title("  ").is_err());
        assert!(validate_title(&"a".repeat(201)).is_err());
        assert!(validate_title("周末读书会").is_ok());
    }
}
