//! HTML 清洗 - 业务能力层
//!
//! 识别服务返回的正文来自不受信任的第三方，必须经过白名单过滤后
//! 才能当作结构化内容使用。这是一条硬安全边界，任何内容路径都不得绕过。
//!
//! 规则：
//! - 只保留白名单内的标签：p / ol / ul / li / strong / em / b / i / code
//! - 唯一保留的属性是 `<ol>` 上的 `type`，且取值限定为 1 / a / A / i / I
//! - `script` 和 `style` 连同其内部文本一起丢弃
//! - 其他标签只去掉标签本身，文本内容保留
//! - HTML 注释丢弃
//! - 不构成标签的裸 `<` 转义为 `&lt;`（数学文本中常见，如 `\(x < 5\)`）

/// 白名单内允许保留的标签
const ALLOWED_TAGS: &[&str] = &["p", "ol", "ul", "li", "strong", "em", "b", "i", "code"];

/// 连同内部文本一起丢弃的标签
const DROP_CONTENT_TAGS: &[&str] = &["script", "style"];

/// `<ol type="...">` 允许的取值
const OL_TYPE_VALUES: &[&str] = &["1", "a", "A", "i", "I"];

/// 白名单 HTML 清洗器
#[derive(Debug, Default, Clone)]
pub struct Sanitizer;

impl Sanitizer {
    pub fn new() -> Self {
        Self
    }

    /// 清洗一段 HTML 文本
    ///
    /// 输出只包含白名单标签和普通文本，可以安全地当作结构化内容。
    /// 对自身输出再次清洗得到相同结果（幂等）。
    pub fn sanitize(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut i = 0;

        while i < input.len() {
            let Some(rel) = input[i..].find('<') else {
                out.push_str(&input[i..]);
                break;
            };
            let lt = i + rel;
            out.push_str(&input[i..lt]);

            // HTML 注释：丢弃到 "-->"
            if input[lt..].starts_with("<!--") {
                i = match input[lt + 4..].find("-->") {
                    Some(end) => lt + 4 + end + 3,
                    None => input.len(),
                };
                continue;
            }

            let Some(tag) = parse_tag(input, lt) else {
                // 不构成标签的裸 '<'
                out.push_str("&lt;");
                i = lt + 1;
                continue;
            };

            if tag.closing {
                if ALLOWED_TAGS.contains(&tag.name.as_str()) {
                    out.push_str("</");
                    out.push_str(&tag.name);
                    out.push('>');
                }
                i = tag.end;
                continue;
            }

            if DROP_CONTENT_TAGS.contains(&tag.name.as_str()) {
                // 连同内部文本跳过，直到对应的闭合标签
                i = skip_past_closing_tag(input, tag.end, &tag.name);
                continue;
            }

            if ALLOWED_TAGS.contains(&tag.name.as_str()) {
                out.push('<');
                out.push_str(&tag.name);
                if tag.name == "ol" {
                    if let Some(value) = filtered_ol_type(&tag.attrs_src) {
                        out.push_str(" type=\"");
                        out.push_str(&value);
                        out.push('"');
                    }
                }
                out.push('>');
            }
            // 白名单外的标签：只丢标签，文本内容照常保留

            i = tag.end;
        }

        out
    }
}

/// 一个被解析出的标签
struct ParsedTag {
    /// 小写标签名
    name: String,
    /// 是否为闭合标签
    closing: bool,
    /// 标签名之后、'>' 之前的原始属性文本
    attrs_src: String,
    /// '>' 之后的字节偏移
    end: usize,
}

/// 从 `lt`（指向 '<'）处解析一个标签
///
/// 只有 "`<`、可选的 `/`、字母开头的标签名、带引号感知的 `>`" 齐全时
/// 才认为是标签，否则返回 None 由调用方按普通文本处理。
fn parse_tag(input: &str, lt: usize) -> Option<ParsedTag> {
    let rest = &input[lt + 1..];
    let closing = rest.starts_with('/');
    let name_start = if closing { 1 } else { 0 };

    let name_len = rest[name_start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .count();
    if name_len == 0 || !rest[name_start..].starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    let name = rest[name_start..name_start + name_len].to_ascii_lowercase();

    // 在引号外寻找 '>'
    let mut in_quote: Option<char> = None;
    let attrs_start = lt + 1 + name_start + name_len;
    for (offset, c) in input[attrs_start..].char_indices() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '"' | '\'' => in_quote = Some(c),
                '>' => {
                    let gt = attrs_start + offset;
                    return Some(ParsedTag {
                        name,
                        closing,
                        attrs_src: input[attrs_start..gt].to_string(),
                        end: gt + 1,
                    });
                }
                _ => {}
            },
        }
    }
    None
}

/// 跳过内部文本，返回对应闭合标签 '>' 之后的位置
///
/// 找不到闭合标签时视为吞掉剩余全部内容（与 DOMPurify 行为一致）。
fn skip_past_closing_tag(input: &str, from: usize, name: &str) -> usize {
    let needle = format!("</{}", name);
    let hay = input.as_bytes();
    let nb = needle.as_bytes();
    let mut i = from;
    while i + nb.len() <= hay.len() {
        if hay[i..i + nb.len()].eq_ignore_ascii_case(nb) {
            return match input[i..].find('>') {
                Some(gt) => i + gt + 1,
                None => input.len(),
            };
        }
        i += 1;
    }
    input.len()
}

/// 从原始属性文本中提取合法的 `type` 取值
fn filtered_ol_type(attrs_src: &str) -> Option<String> {
    for (name, value) in parse_attrs(attrs_src) {
        if name == "type" && OL_TYPE_VALUES.contains(&value.as_str()) {
            return Some(value);
        }
    }
    None
}

/// 解析属性文本为 (小写名, 值) 列表
fn parse_attrs(src: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        // 跳过空白和自闭合斜杠
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == '/') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        // 属性名
        let name_start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-' || chars[i] == '_') {
            i += 1;
        }
        if i == name_start {
            // 无法识别的字符，跳过以避免死循环
            i += 1;
            continue;
        }
        let name: String = chars[name_start..i].iter().collect::<String>().to_ascii_lowercase();

        // 可选的 = 值
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < chars.len() && chars[i] == '=' {
            i += 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
                let quote = chars[i];
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    value.push(chars[i]);
                    i += 1;
                }
                i += 1; // 闭合引号
            } else {
                while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '>' {
                    value.push(chars[i]);
                    i += 1;
                }
            }
        }

        attrs.push((name, value));
    }

    attrs
}
