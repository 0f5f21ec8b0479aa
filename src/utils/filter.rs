use regex::Regex;

use crate::error::{CaptureError, Result};

/// 디바이스 이름 필터.
///
/// 패턴은 셸 glob 형태로 `*`는 임의 문자열, `?`는 임의 한 글자에 대응한다.
/// 생성 시 한 번만 컴파일하고, 전체 문자열 일치(anchored)로 비교한다.
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl DeviceFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| {
                CaptureError::config(format!("invalid device filter '{pattern}': {e}"))
            })?;
            compiled.push(regex);
        }
        Ok(Self {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            compiled,
        })
    }

    /// 모든 디바이스 허용
    pub fn accept_all() -> Self {
        Self {
            patterns: Vec::new(),
            compiled: Vec::new(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.compiled.is_empty() || self.compiled.iter().any(|re| re.is_match(name))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::accept_all()
    }
}

// "nvme*" -> "^nvme.*$". 와일드카드와 [...] 클래스 외의 문자는 escape 한다.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' | '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if ch == '*' { ".*" } else { "." });
            }
            '[' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                // glob 클래스는 그대로 넘긴다. 닫히지 않은 '['는 컴파일 단계에서 에러가 된다.
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            _ => literal.push(ch),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

/// "nvme*,sd?" 형태의 쉼표 구분 패턴 목록 파싱
pub fn parse_filter_list(value_str: &str) -> Vec<String> {
    value_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
