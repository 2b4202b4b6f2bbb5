//! 内容归一化 - 业务能力层
//!
//! 识别服务返回的正文常常把编号（`1)`、`a.`、`iv-` 等）当作普通文本行，
//! 本模块负责把这类启发式编号转换为真正的嵌套有序列表，并做防御性清理：
//!
//! 1. 折叠重复的行内数学定界符（服务端已知的一类格式故障）
//! 2. 去掉首尾的 markdown 代码围栏
//! 3. 编号行分类（三层：数字 / 小写字母 / 小写罗马数字）+ 栈式嵌套
//! 4. 白名单清洗（见 [`crate::services::sanitizer`]，任何路径都不跳过）
//!
//! 整个过程是纯函数：相同输入必然得到相同输出，对自身输出幂等。

use regex::Regex;

use crate::error::AppResult;
use crate::services::sanitizer::Sanitizer;

/// 编号行的闭合定界符
const CLOSING_DELIMS: [char; 4] = [')', '.', ':', '-'];

/// 合法的小写罗马数字记号（i..x 的组合）
const ROMAN_TOKENS: [&str; 10] = ["i", "ii", "iii", "iv", "v", "vi", "vii", "viii", "ix", "x"];

/// 内容归一化器
pub struct ContentNormalizer {
    sanitizer: Sanitizer,
    re_dup_open_paren: Regex,
    re_dup_close_paren: Regex,
    re_dup_open_bracket: Regex,
    re_dup_close_bracket: Regex,
    re_fence_open: Regex,
    re_fence_close: Regex,
    re_br: Regex,
    re_fence_any: Regex,
}

impl ContentNormalizer {
    pub fn new() -> AppResult<Self> {
        Ok(Self {
            sanitizer: Sanitizer::new(),
            re_dup_open_paren: Regex::new(r"\\\(\s*\\\(")?,
            re_dup_close_paren: Regex::new(r"\\\)\s*\\\)")?,
            re_dup_open_bracket: Regex::new(r"\\\[\s*\\\[")?,
            re_dup_close_bracket: Regex::new(r"\\\]\s*\\\]")?,
            re_fence_open: Regex::new(r"(?im)^```(?:html|json)?[ \t]*\n?")?,
            re_fence_close: Regex::new(r"(?im)\n?```\s*$")?,
            re_br: Regex::new(r"(?i)<br\s*/?>")?,
            re_fence_any: Regex::new(r"(?im)^```[a-z]*\n?|```$")?,
        })
    }

    /// 清理并归一化一段正文
    ///
    /// 输入可以是已带结构化列表标记的 HTML，也可以是只有换行的平文本；
    /// 输出一定只含白名单标签，可以当作受信任的结构化内容。
    pub fn clean(&self, content: &str) -> String {
        if content.is_empty() {
            return String::new();
        }

        let collapsed = self.collapse_math_delimiters(content);
        let stripped = self.strip_outer_fences(&collapsed);
        let structured = self.normalize_enumerations(&stripped);

        // 清洗是硬安全边界，所有路径（包括放弃转换的路径）都要经过
        self.sanitizer.sanitize(&structured)
    }

    /// 折叠重复的数学定界符序列
    ///
    /// `\( \(` → `\(`，右括号与方括号同理。循环到不动点，保证幂等。
    fn collapse_math_delimiters(&self, text: &str) -> String {
        let mut cur = text.to_string();
        loop {
            let mut next = self.re_dup_open_paren.replace_all(&cur, r"\(").into_owned();
            next = self.re_dup_close_paren.replace_all(&next, r"\)").into_owned();
            next = self.re_dup_open_bracket.replace_all(&next, r"\[").into_owned();
            next = self.re_dup_close_bracket.replace_all(&next, r"\]").into_owned();
            if next == cur {
                return cur;
            }
            cur = next;
        }
    }

    /// 去掉首尾 markdown 围栏并 trim
    fn strip_outer_fences(&self, text: &str) -> String {
        let s = self.re_fence_open.replace(text, "");
        let s = self.re_fence_close.replace(&s, "");
        s.trim().to_string()
    }

    /// 把编号行转换为嵌套有序列表
    ///
    /// 输入已含列表标记时原样返回（绝不二次包裹）；
    /// 编号行少于 2 行时放弃转换（防止把恰好以数字开头的叙述文误判为列表）。
    fn normalize_enumerations(&self, html: &str) -> String {
        if (html.contains("<ol") || html.contains("<ul")) && html.contains("<li>") {
            return html.to_string();
        }

        let work = self.re_br.replace_all(html, "\n");
        let work = self.re_fence_any.replace_all(&work, "");

        let items: Vec<LineItem> = work
            .split('\n')
            .filter_map(|l| {
                let trimmed = l.trim();
                (!trimmed.is_empty()).then(|| classify_line(trimmed))
            })
            .collect();

        let enumerated = items.iter().filter(|i| i.level > 0).count();
        if enumerated < 2 {
            return html.to_string();
        }

        render_nested_lists(&items)
    }
}

// ========== 行分类器 ==========

/// 一行的分类结果：层级（0 表示普通段落）、编号标签、剩余文本
#[derive(Debug, Clone, PartialEq, Eq)]
struct LineItem {
    level: u8,
    label: String,
    text: String,
}

/// 按 1 → 2 → 3 的顺序尝试分类，取第一个命中的层级
///
/// 注意单个 `i` / `v` / `x` 会先命中第 2 层（单个小写字母），
/// 第 3 层实际只接收多字符罗马记号，这与参考行为一致。
fn classify_line(line: &str) -> LineItem {
    if let Some(item) = match_decimal(line) {
        return item;
    }
    if let Some(item) = match_alpha(line) {
        return item;
    }
    if let Some(item) = match_roman(line) {
        return item;
    }
    LineItem {
        level: 0,
        label: String::new(),
        text: line.to_string(),
    }
}

/// 去掉可选的前导左括号
fn strip_optional_paren(line: &str) -> &str {
    line.strip_prefix('(').unwrap_or(line)
}

/// 第 1 层：1-2 位数字 + 闭合定界符
///
/// 贪婪取两位，必要时回退到一位；三位以上的数字串不视为编号。
fn match_decimal(line: &str) -> Option<LineItem> {
    let body = strip_optional_paren(line);
    let digit_run = body.chars().take_while(|c| c.is_ascii_digit()).count();
    if digit_run == 0 {
        return None;
    }

    for len in [digit_run.min(2), 1] {
        let after = &body[len..];
        if let Some(delim) = after.chars().next() {
            if CLOSING_DELIMS.contains(&delim) {
                return Some(LineItem {
                    level: 1,
                    label: body[..len].to_string(),
                    text: after[delim.len_utf8()..].trim().to_string(),
                });
            }
        }
    }
    None
}

/// 第 2 层：单个小写字母 + 闭合定界符
fn match_alpha(line: &str) -> Option<LineItem> {
    let body = strip_optional_paren(line);
    let mut chars = body.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_lowercase() {
        return None;
    }
    let delim = chars.next()?;
    if !CLOSING_DELIMS.contains(&delim) {
        return None;
    }
    Some(LineItem {
        level: 2,
        label: letter.to_string(),
        text: chars.as_str().trim().to_string(),
    })
}

/// 第 3 层：小写罗马数字记号 + 闭合定界符
fn match_roman(line: &str) -> Option<LineItem> {
    let body = strip_optional_paren(line);
    let token_len = body
        .chars()
        .take_while(|c| matches!(c, 'i' | 'v' | 'x'))
        .count();
    if token_len == 0 {
        return None;
    }
    let token = &body[..token_len];
    if !ROMAN_TOKENS.contains(&token) {
        return None;
    }
    let after = &body[token_len..];
    let delim = after.chars().next()?;
    if !CLOSING_DELIMS.contains(&delim) {
        return None;
    }
    Some(LineItem {
        level: 3,
        label: token.to_string(),
        text: after[delim.len_utf8()..].trim().to_string(),
    })
}

// ========== 嵌套栈机 ==========

/// 一个已打开的列表层级
struct OpenLevel {
    level: u8,
    /// 当前层是否有未闭合的 `<li>`
    item_open: bool,
}

/// 把分类后的行渲染为合法的嵌套列表标记
///
/// 子列表嵌在父层当前 `<li>` 内部；层级永不跳跃（中间层补充匿名 `<li>`
/// 包裹），也不会产生空列表。段落（第 0 层）关闭全部已打开层级。
fn render_nested_lists(items: &[LineItem]) -> String {
    let mut out = String::new();
    let mut stack: Vec<OpenLevel> = Vec::new();

    for item in items {
        if item.level == 0 {
            close_to_level(&mut out, &mut stack, 0);
            out.push_str("<p>");
            out.push_str(&escape_html(&item.text));
            out.push_str("</p>");
            continue;
        }

        let top = stack.last().map(|o| o.level).unwrap_or(0);
        if top < item.level {
            for lv in top + 1..=item.level {
                open_list(&mut out, &mut stack, lv);
                if lv < item.level {
                    // 跳级时用匿名条目包住更深一层的列表
                    out.push_str("<li>");
                    if let Some(open) = stack.last_mut() {
                        open.item_open = true;
                    }
                }
            }
        } else if top > item.level {
            close_to_level(&mut out, &mut stack, item.level);
        }

        if let Some(open) = stack.last_mut() {
            if open.item_open {
                out.push_str("</li>");
            }
            open.item_open = true;
        }
        out.push_str("<li>");
        out.push_str(&escape_html(&item.text));
    }

    close_to_level(&mut out, &mut stack, 0);
    out
}

fn open_list(out: &mut String, stack: &mut Vec<OpenLevel>, level: u8) {
    match level {
        2 => out.push_str("<ol type=\"a\">"),
        3 => out.push_str("<ol type=\"i\">"),
        _ => out.push_str("<ol>"),
    }
    stack.push(OpenLevel {
        level,
        item_open: false,
    });
}

/// 逐层关闭，直到栈顶层级不高于 `level`
fn close_to_level(out: &mut String, stack: &mut Vec<OpenLevel>, level: u8) {
    while stack.last().map(|o| o.level > level).unwrap_or(false) {
        if let Some(open) = stack.pop() {
            if open.item_open {
                out.push_str("</li>");
            }
            out.push_str("</ol>");
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
