//! Declaration classification.
//!
//! Pure functions over one whitespace-normalized statement or block header.
//! Nothing here knows about scopes; the scanner decides what a classified
//! piece means where it appears.

use crate::types::{AliasForm, Param, TypeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeHeader {
    pub kind: TypeKind,
    pub name: String,
    pub bases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumHeader {
    /// Empty for anonymous enums.
    pub name: String,
    pub scoped: bool,
    pub underlying: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    pub name: String,
    /// `Owner` in `Owner::Name`, template arguments removed.
    pub qualifier: Option<String>,
    pub return_type: String,
    pub params: Vec<Param>,
    pub is_virtual: bool,
    pub is_static: bool,
    pub is_const: bool,
    pub is_pure_virtual: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySig {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasSig {
    pub name: String,
    pub target: String,
    pub form: AliasForm,
}

/// What a `{` opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// Possibly empty (anonymous) or compact (`A::B`).
    Namespace(String),
    /// `extern "C" {`: members belong to the enclosing scope.
    Transparent,
    Type(TypeHeader),
    AnonymousType,
    Enum(EnumHeader),
    Function(FunctionSig),
    /// Braced initializer of a data member.
    Property(PropertySig),
    Opaque,
}

/// What a `;` terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Function(FunctionSig),
    Properties(Vec<PropertySig>),
    Alias(AliasSig),
    Ignore,
}

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "sizeof", "decltype", "catch", "new", "delete",
    "static_assert", "alignof", "typeid", "throw", "co_return", "co_await", "case", "do", "else",
];

const BUILTIN_TYPES: &[&str] = &[
    "int", "char", "short", "long", "double", "float", "bool", "unsigned", "signed", "void",
    "const", "volatile", "auto", "wchar_t",
];

const FUNCTION_PREFIX_KEYWORDS: &[&str] = &[
    "inline", "explicit", "constexpr", "consteval", "extern", "friend", "FORCEINLINE",
    "FORCENOINLINE", "FORCEINLINE_DEBUGGABLE", "UE_NODISCARD", "UE_NODISCARD_CTOR", "CONSTEXPR",
    "typename",
];

const STORAGE_KEYWORDS: &[&str] = &["static", "mutable", "inline", "constexpr", "thread_local", "extern"];

// ============================================================================
// Entry points
// ============================================================================

pub fn classify_header(text: &str) -> Header {
    let t = strip_template_prefix(text.trim());
    if t.is_empty() {
        return Header::Opaque;
    }

    let first = first_token(t);
    if first == "namespace" || (first == "inline" && t.starts_with("inline namespace")) {
        let rest = t.trim_start_matches("inline").trim_start();
        let name = rest["namespace".len()..].trim();
        let name = strip_macro_calls(name);
        return Header::Namespace(name.trim().to_string());
    }
    if first == "extern" && t[first.len()..].trim_start().starts_with('"') {
        return Header::Transparent;
    }
    if first == "typedef" {
        return match classify_header(&t["typedef".len()..]) {
            Header::Type(h) => Header::Type(h),
            _ => Header::AnonymousType,
        };
    }
    if matches!(first, "class" | "struct" | "union") {
        match parse_type_header(t) {
            Some(Some(header)) => return Header::Type(header),
            Some(None) => return Header::AnonymousType,
            None => {}
        }
    }
    if first == "enum" {
        return Header::Enum(parse_enum_header(t));
    }
    if let Some(sig) = parse_function(t) {
        return Header::Function(sig);
    }
    if let Some(prop) = parse_properties(t).into_iter().next() {
        return Header::Property(prop);
    }
    Header::Opaque
}

pub fn classify_statement(text: &str, in_type: bool) -> Statement {
    let t = text.trim();
    if t.is_empty() {
        return Statement::Ignore;
    }
    let stripped = strip_template_prefix(t);
    let first = first_token(stripped);

    match first {
        "using" | "typedef" => {
            return parse_alias(stripped)
                .map(Statement::Alias)
                .unwrap_or(Statement::Ignore);
        }
        "friend" | "static_assert" | "namespace" | "return" | "template" | "goto" | "break"
        | "continue" => return Statement::Ignore,
        "class" | "struct" | "union" | "enum" if is_forward_declaration(stripped) => {
            return Statement::Ignore;
        }
        _ => {}
    }
    if first == "extern" && stripped.contains("template") {
        return Statement::Ignore;
    }

    if let Some(sig) = parse_function(stripped) {
        return Statement::Function(sig);
    }
    if in_type {
        let props = parse_properties(stripped);
        if !props.is_empty() {
            return Statement::Properties(props);
        }
    }
    Statement::Ignore
}

// ============================================================================
// Types and enums
// ============================================================================

/// `Some(None)` for anonymous types, `None` when the text is not a type
/// header at all.
fn parse_type_header(t: &str) -> Option<Option<TypeHeader>> {
    let keyword = first_token(t);
    let kind = match keyword {
        "class" => TypeKind::Class,
        "struct" => TypeKind::Struct,
        "union" => TypeKind::Union,
        _ => return None,
    };
    let rest = t[keyword.len()..].trim();
    let (left, bases) = match find_single_colon(rest) {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };
    let left = strip_attributes(&strip_macro_calls(left));
    if left.contains('(') || left.contains('=') {
        return None;
    }

    let tokens: Vec<&str> = left
        .split_whitespace()
        .filter(|tok| !is_api_macro(tok) && !matches!(*tok, "final" | "sealed" | "abstract"))
        .collect();
    if tokens.is_empty() {
        return Some(None);
    }
    let name = match tokens.iter().position(|tok| tok.contains('<')) {
        Some(idx) => tokens[idx..].join(" "),
        None => tokens[tokens.len() - 1].to_string(),
    };
    if name.contains('*') || name.contains('&') || !starts_like_ident(&name) {
        return None;
    }

    let bases = bases
        .map(|b| {
            split_top_level(b, ',')
                .into_iter()
                .map(strip_base_access)
                .filter(|b| !b.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(Some(TypeHeader { kind, name, bases }))
}

fn strip_base_access(base: &str) -> String {
    let mut b = base.trim();
    loop {
        let tok = first_token(b);
        if matches!(tok, "public" | "protected" | "private" | "virtual") {
            b = b[tok.len()..].trim_start();
        } else {
            break;
        }
    }
    b.to_string()
}

fn parse_enum_header(t: &str) -> EnumHeader {
    let mut rest = t["enum".len()..].trim();
    let mut scoped = false;
    for kw in ["class", "struct"] {
        if first_token(rest) == kw {
            rest = rest[kw.len()..].trim();
            scoped = true;
        }
    }
    let (left, underlying) = match find_single_colon(rest) {
        Some(pos) => (&rest[..pos], Some(rest[pos + 1..].trim().to_string())),
        None => (rest, None),
    };
    let name = left
        .split_whitespace()
        .filter(|tok| !is_api_macro(tok))
        .last()
        .unwrap_or("")
        .to_string();
    EnumHeader {
        name,
        scoped,
        underlying: underlying.filter(|u| !u.is_empty()),
    }
}

/// Enumerator names from the text between an enum's braces.
pub fn parse_enum_values(body: &str) -> Vec<String> {
    split_top_level(body, ',')
        .into_iter()
        .filter_map(|entry| {
            let entry = strip_macro_calls(entry);
            let name = match find_top_level_char(&entry, '=') {
                Some(pos) => entry[..pos].trim().to_string(),
                None => entry.trim().to_string(),
            };
            is_ident(&name).then_some(name)
        })
        .collect()
}

fn is_forward_declaration(t: &str) -> bool {
    let keyword = first_token(t);
    let mut rest = t[keyword.len()..].trim();
    if keyword == "enum" {
        for kw in ["class", "struct"] {
            if first_token(rest) == kw {
                rest = rest[kw.len()..].trim();
            }
        }
        if let Some(pos) = find_single_colon(rest) {
            rest = &rest[..pos];
        }
    }
    let tokens: Vec<&str> = rest
        .split_whitespace()
        .filter(|tok| !is_api_macro(tok))
        .collect();
    tokens.len() <= 1 && tokens.iter().all(|tok| starts_like_ident(tok))
}

// ============================================================================
// Functions
// ============================================================================

pub fn parse_function(text: &str) -> Option<FunctionSig> {
    let is_pure_macro = text.contains("PURE_VIRTUAL(");
    let cleaned = strip_attributes(&strip_macro_calls(strip_template_prefix(text)));
    let t = cleaned.trim();

    let open = find_call_paren(t)?;
    let head = t[..open].trim_end();
    if head.is_empty() {
        return None;
    }
    if find_top_level_char(head, '=').is_some() && !head.contains("operator") {
        return None;
    }
    let close = matching_close(t, open)?;
    let params_text = &t[open + 1..close];
    if params_text.trim_start().starts_with(['*', '&', '^']) {
        return None;
    }
    let tail = t[close + 1..].trim();
    if tail.starts_with('(') || tail.starts_with('[') {
        return None;
    }

    let (full_name, prefix) = split_declarator_name(head)?;
    if full_name.is_empty() || full_name.ends_with(':') {
        return None;
    }
    let (qualifier, name) = match rfind_top_level_scope(&full_name) {
        Some(pos) => (
            Some(strip_template_args(&full_name[..pos])),
            full_name[pos + 2..].to_string(),
        ),
        None => (None, full_name.clone()),
    };
    if name.is_empty() || CONTROL_KEYWORDS.contains(&name.as_str()) {
        return None;
    }
    if !(starts_like_ident(&name) || name.starts_with('~') || name.starts_with("operator")) {
        return None;
    }
    if prefix.contains('(') || prefix.contains('=') || prefix.contains('"') {
        return None;
    }

    let mut is_virtual = false;
    let mut is_static = false;
    let mut return_tokens = Vec::new();
    for tok in prefix.split_whitespace() {
        match tok {
            "virtual" => is_virtual = true,
            "static" => is_static = true,
            tok if FUNCTION_PREFIX_KEYWORDS.contains(&tok) || is_api_macro(tok) => {}
            tok => return_tokens.push(tok),
        }
    }
    if matches!(return_tokens.first(), Some(&"class") | Some(&"struct") | Some(&"enum")) && return_tokens.len() > 1 {
        return_tokens.remove(0);
    }
    let mut return_type = return_tokens.join(" ");

    // Tail: qualifiers before any initializer list or pure specifier.
    let tail_head = match find_single_colon(tail) {
        Some(pos) => &tail[..pos],
        None => tail,
    };
    let mut is_const = false;
    let mut is_pure_virtual = is_pure_macro;
    for tok in tail_head.split_whitespace() {
        match tok {
            "const" => is_const = true,
            "override" | "final" => is_virtual = true,
            _ => {}
        }
    }
    if let Some(eq) = find_top_level_char(tail_head, '=') {
        if tail_head[eq + 1..].trim() == "0" {
            is_pure_virtual = true;
        }
    }
    if is_pure_virtual {
        is_virtual = true;
    }
    if let Some(arrow) = tail_head.find("->") {
        if return_type == "auto" {
            let trailing = tail_head[arrow + 2..]
                .split(['=', '{'])
                .next()
                .unwrap_or("")
                .split_whitespace()
                .filter(|tok| !matches!(*tok, "override" | "final" | "const"))
                .collect::<Vec<_>>()
                .join(" ");
            if !trailing.is_empty() {
                return_type = trailing;
            }
        }
    }

    Some(FunctionSig {
        name,
        qualifier,
        return_type,
        params: parse_params(params_text),
        is_virtual,
        is_static,
        is_const,
        is_pure_virtual,
    })
}

/// Parameters split at top-level commas, so template arguments such as
/// `TMap<FString, int32>` stay inside one parameter.
pub fn parse_params(text: &str) -> Vec<Param> {
    let parts = split_top_level(text, ',');
    if parts.len() == 1 && matches!(parts[0].trim(), "" | "void") {
        return Vec::new();
    }
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(parse_param)
        .collect()
}

fn parse_param(text: &str) -> Param {
    let (decl, default) = match find_top_level_char(text, '=') {
        Some(pos) => (text[..pos].trim(), Some(text[pos + 1..].trim().to_string())),
        None => (text, None),
    };
    if decl.contains('(') || decl == "..." {
        return Param {
            type_name: decl.to_string(),
            name: None,
            default,
        };
    }
    let without_array = strip_array_suffix(decl);
    let (name_start, name) = trailing_ident(without_array);
    let prefix = without_array[..name_start].trim_end();
    let has_name = !name.is_empty()
        && !prefix.is_empty()
        && !prefix.ends_with("::")
        && !prefix.ends_with('<')
        && !BUILTIN_TYPES.contains(&name)
        && !is_api_macro(name);
    if has_name {
        Param {
            type_name: prefix.to_string(),
            name: Some(name.to_string()),
            default,
        }
    } else {
        Param {
            type_name: decl.to_string(),
            name: None,
            default,
        }
    }
}

/// First `(` at angle depth 0 that opens a parameter list. For
/// `operator()` the name's own parentheses are skipped.
fn find_call_paren(t: &str) -> Option<usize> {
    let mut from = 0;
    loop {
        let rel = find_top_level_open_paren(&t[from..])?;
        let pos = from + rel;
        if t[..pos].trim_end().ends_with("operator") {
            let close = matching_close(t, pos)?;
            from = close + 1;
            continue;
        }
        return Some(pos);
    }
}

fn find_top_level_open_paren(s: &str) -> Option<usize> {
    let mut angle = 0i32;
    let mut prev = '\0';
    for (idx, c) in s.char_indices() {
        match c {
            '<' if is_template_open(s, idx) => angle += 1,
            '>' if angle > 0 && prev != '-' => angle -= 1,
            '(' if angle == 0 => return Some(idx),
            _ => {}
        }
        prev = c;
    }
    None
}

/// Split the trailing declarator name (`A::B<T>::Name`, `~Name`,
/// `operator==`) from the text before it.
fn split_declarator_name(head: &str) -> Option<(String, &str)> {
    if let Some(op) = find_operator_keyword(head) {
        let mut start = op;
        while head[..start].ends_with("::") {
            let before = &head[..start - 2];
            let (ident_start, ident) = trailing_ident(before);
            if ident.is_empty() {
                break;
            }
            start = ident_start;
        }
        let symbol = head[op + "operator".len()..].trim();
        let qualifier = &head[start..op];
        let name = if symbol.starts_with(|c: char| c.is_ascii_alphabetic()) {
            format!("{qualifier}operator {symbol}")
        } else {
            format!("{qualifier}operator{}", symbol.replace(' ', ""))
        };
        return Some((name, &head[..start]));
    }

    let bytes = head.as_bytes();
    let mut j = bytes.len();
    loop {
        while j > 0 && is_declarator_byte(bytes[j - 1]) {
            j -= 1;
        }
        if j > 0 && bytes[j - 1] == b'>' && head[j..].starts_with("::") {
            let open = matching_angle_backwards(head, j - 1)?;
            j = open;
            continue;
        }
        break;
    }
    let name: String = head[j..].chars().filter(|c| !c.is_whitespace()).collect();
    Some((name, &head[..j]))
}

fn is_declarator_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b':' || b == b'~'
}

fn find_operator_keyword(head: &str) -> Option<usize> {
    let mut search = 0;
    while let Some(rel) = head[search..].find("operator") {
        let pos = search + rel;
        let before_ok = pos == 0 || !is_ident_byte(head.as_bytes()[pos - 1]) || head[..pos].ends_with("::");
        let after = head.as_bytes().get(pos + "operator".len());
        let after_ok = after.is_none_or(|b| !is_ident_byte(*b));
        if before_ok && after_ok {
            return Some(pos);
        }
        search = pos + 1;
    }
    None
}

fn matching_angle_backwards(s: &str, close: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut i = close + 1;
    while i > 0 {
        i -= 1;
        match bytes[i] {
            b'>' => depth += 1,
            b'<' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Position of the last `::` outside template brackets.
fn rfind_top_level_scope(name: &str) -> Option<usize> {
    let bytes = name.as_bytes();
    let mut angle = 0i32;
    let mut i = bytes.len();
    while i > 1 {
        i -= 1;
        match bytes[i] {
            b'>' => angle += 1,
            b'<' => angle -= 1,
            b':' if angle == 0 && bytes[i - 1] == b':' => return Some(i - 1),
            _ => {}
        }
    }
    None
}

// ============================================================================
// Properties and aliases
// ============================================================================

pub fn parse_properties(text: &str) -> Vec<PropertySig> {
    let mut t = text.trim();
    let first = first_token(t);
    if matches!(
        first,
        "friend" | "using" | "typedef" | "static_assert" | "template" | "return" | "namespace" | "operator"
    ) {
        return Vec::new();
    }
    if matches!(first, "class" | "struct" | "enum" | "union") {
        t = t[first.len()..].trim_start();
    }

    let parts = split_top_level(t, ',');
    let mut props = Vec::new();
    let mut base_type = String::new();
    for (idx, part) in parts.iter().enumerate() {
        let decl = declarator_without_initializer(part);
        if decl.contains('(') {
            return props;
        }
        let decl = strip_array_suffix(decl.trim());
        let (start, name) = trailing_ident(decl);
        if name.is_empty() || BUILTIN_TYPES.contains(&name) || is_api_macro(name) {
            return props;
        }
        let prefix = decl[..start].trim();
        if idx == 0 {
            let type_name = prefix
                .split_whitespace()
                .filter(|tok| !STORAGE_KEYWORDS.contains(tok))
                .collect::<Vec<_>>()
                .join(" ");
            if type_name.is_empty() || type_name.ends_with("::") || type_name.ends_with(',') {
                return props;
            }
            base_type = type_name.trim_end_matches(['*', '&']).trim_end().to_string();
            props.push(PropertySig {
                name: name.to_string(),
                type_name,
            });
        } else {
            let type_name = if prefix.is_empty() {
                base_type.clone()
            } else {
                format!("{base_type}{prefix}")
            };
            props.push(PropertySig {
                name: name.to_string(),
                type_name,
            });
        }
    }
    props
}

fn declarator_without_initializer(part: &str) -> &str {
    let mut end = part.len();
    for delim in ['=', '{'] {
        if let Some(pos) = find_top_level_char(part, delim) {
            end = end.min(pos);
        }
    }
    let decl = &part[..end];
    match find_single_colon(decl) {
        Some(pos) => &decl[..pos],
        None => decl,
    }
}

pub fn parse_alias(text: &str) -> Option<AliasSig> {
    let t = strip_template_prefix(text.trim());
    if let Some(rest) = t.strip_prefix("using ") {
        let rest = rest.trim();
        if first_token(rest) == "namespace" {
            return None;
        }
        let eq = find_top_level_char(rest, '=')?;
        let name = rest[..eq].trim();
        if !is_ident(name) {
            return None;
        }
        return Some(AliasSig {
            name: name.to_string(),
            target: rest[eq + 1..].trim().to_string(),
            form: AliasForm::Using,
        });
    }

    let rest = t.strip_prefix("typedef ")?.trim();
    if let Some(name) = function_pointer_name(rest) {
        return Some(AliasSig {
            name,
            target: rest.to_string(),
            form: AliasForm::Typedef,
        });
    }
    let decl = strip_array_suffix(rest);
    let (start, name) = trailing_ident(decl);
    let target = decl[..start].trim();
    if name.is_empty() || target.is_empty() {
        return None;
    }
    Some(AliasSig {
        name: name.to_string(),
        target: target.to_string(),
        form: AliasForm::Typedef,
    })
}

/// `Ret (*Name)(Args)` / `Ret (Class::*Name)(Args)`.
fn function_pointer_name(t: &str) -> Option<String> {
    let open = t.find('(')?;
    let close = matching_close(t, open)?;
    let inner = t[open + 1..close].trim();
    let star = inner.rfind(['*', '&'])?;
    let name = inner[star + 1..].trim();
    is_ident(name).then(|| name.to_string())
}

// ============================================================================
// Lexical helpers
// ============================================================================

/// Split at `sep` outside parentheses, brackets, braces, template angle
/// brackets and string literals.
pub fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut angle = 0i32;
    let mut in_string = false;
    let mut prev = '\0';
    let mut start = 0;
    for (idx, c) in s.char_indices() {
        if in_string {
            if c == '"' && prev != '\\' {
                in_string = false;
            }
            prev = c;
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '<' if is_template_open(s, idx) => angle += 1,
            '>' if angle > 0 && prev != '-' => angle -= 1,
            c if c == sep && depth == 0 && angle == 0 => {
                parts.push(&s[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
        prev = c;
    }
    parts.push(&s[start..]);
    parts
}

/// A `<` opens template arguments when it directly follows an identifier
/// that is not `operator` and is not part of `<<`.
fn is_template_open(s: &str, idx: usize) -> bool {
    let bytes = s.as_bytes();
    if bytes.get(idx + 1) == Some(&b'<') || (idx > 0 && bytes[idx - 1] == b'<') {
        return false;
    }
    let (_, ident) = trailing_ident(&s[..idx]);
    !ident.is_empty()
        && ident != "operator"
        && ident
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn find_top_level_char(s: &str, target: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut angle = 0i32;
    let mut in_string = false;
    let mut prev = '\0';
    for (idx, c) in s.char_indices() {
        if in_string {
            if c == '"' && prev != '\\' {
                in_string = false;
            }
            prev = c;
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' if c != target => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '<' if is_template_open(s, idx) => angle += 1,
            '>' if angle > 0 && prev != '-' => angle -= 1,
            c if c == target && depth == 0 && angle == 0 => {
                // `==`, `<=`, `>=` and `!=` are comparisons, not initializers.
                let is_comparison = target == '='
                    && (s[idx + 1..].starts_with('=') || matches!(prev, '=' | '!' | '<' | '>'));
                if !is_comparison {
                    return Some(idx);
                }
            }
            _ => {}
        }
        prev = c;
    }
    None
}

/// A `:` that is neither half of `::` nor inside brackets.
fn find_single_colon(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut angle = 0i32;
    let mut prev = '\0';
    for (idx, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '<' if is_template_open(s, idx) => angle += 1,
            '>' if angle > 0 && prev != '-' => angle -= 1,
            ':' if depth == 0 && angle == 0 => {
                let doubled = bytes.get(idx + 1) == Some(&b':') || (idx > 0 && bytes[idx - 1] == b':');
                if !doubled {
                    return Some(idx);
                }
            }
            _ => {}
        }
        prev = c;
    }
    None
}

/// Index of the `)` matching the `(` at `open`.
pub fn matching_close(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut prev = '\0';
    for (idx, c) in s[open..].char_indices() {
        if in_string {
            if c == '"' && prev != '\\' {
                in_string = false;
            }
            prev = c;
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
        prev = c;
    }
    None
}

/// Drop leading `template<...>` clauses.
pub fn strip_template_prefix(s: &str) -> &str {
    let mut t = s.trim_start();
    while let Some(rest) = t.strip_prefix("template") {
        let rest = rest.trim_start();
        if !rest.starts_with('<') {
            break;
        }
        let mut depth = 0i32;
        let mut end = None;
        for (idx, c) in rest.char_indices() {
            match c {
                '<' => depth += 1,
                '>' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(idx);
                        break;
                    }
                }
                _ => {}
            }
        }
        match end {
            Some(end) => t = rest[end + 1..].trim_start(),
            None => break,
        }
    }
    t
}

/// Remove macro invocations such as `UE_DEPRECATED(5.1, "...")`,
/// `UPARAM(ref)`, `UMETA(...)` and `alignas(16)`.
pub fn strip_macro_calls(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let bytes = s.as_bytes();
    while i < bytes.len() {
        if is_ident_byte(bytes[i]) && (i == 0 || !is_ident_byte(bytes[i - 1])) {
            let start = i;
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            let ident = &s[start..i];
            let mut j = i;
            while j < bytes.len() && bytes[j] == b' ' {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'(' && is_strippable_macro(ident) {
                if let Some(close) = matching_close(s, j) {
                    i = close + 1;
                    continue;
                }
            }
            out.push_str(ident);
            continue;
        }
        let ch = s[i..].chars().next().unwrap_or(' ');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn is_strippable_macro(ident: &str) -> bool {
    matches!(
        ident,
        "alignas" | "__declspec" | "__attribute__" | "UPARAM" | "UMETA" | "TEXT" | "DEPRECATED"
    ) || (ident.contains('_')
        && ident.len() > 2
        && ident
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
}

fn strip_attributes(s: &str) -> String {
    let mut out = s.to_string();
    while let Some(start) = out.find("[[") {
        match out[start..].find("]]") {
            Some(end) => out.replace_range(start..start + end + 2, ""),
            None => break,
        }
    }
    out
}

fn strip_array_suffix(s: &str) -> &str {
    let mut t = s.trim_end();
    while t.ends_with(']') {
        match t.rfind('[') {
            Some(pos) => t = t[..pos].trim_end(),
            None => break,
        }
    }
    t
}

fn strip_template_args(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            c if depth == 0 && !c.is_whitespace() => out.push(c),
            _ => {}
        }
    }
    out
}

/// Start index and text of the identifier ending `s` (ignoring trailing
/// whitespace, pointer and reference markers excluded).
fn trailing_ident(s: &str) -> (usize, &str) {
    let trimmed = s.trim_end();
    let bytes = trimmed.as_bytes();
    let mut start = bytes.len();
    while start > 0 && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    let ident = &trimmed[start..];
    if ident.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return (trimmed.len(), "");
    }
    (start, ident)
}

fn first_token(s: &str) -> &str {
    let s = s.trim_start();
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

pub fn is_ident(s: &str) -> bool {
    starts_like_ident(s) && s.bytes().all(is_ident_byte)
}

fn starts_like_ident(s: &str) -> bool {
    s.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

/// `ENGINE_API`, `COREUOBJECT_API`, `DLLEXPORT`.
pub fn is_api_macro(tok: &str) -> bool {
    (tok.ends_with("_API") && tok.len() > 4 && tok.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
        || matches!(tok, "DLLEXPORT" | "DLLIMPORT")
}
