//! Statement scanner.
//!
//! Walks comment-stripped source byte by byte, keeping a stack of open
//! scopes. Text between statement boundaries is collected into a chunk with
//! whitespace collapsed; a `;` hands the chunk to the statement classifier,
//! a `{` to the header classifier. Function bodies and other opaque blocks
//! are skipped by brace counting; inside a function body the names of
//! called functions (`Name(`) are recorded on the callable or definition.
//!
//! Reflection macros (`UCLASS(...)`, `UPROPERTY(...)`, ...) are held as the
//! pending macro and attach to the next declaration. Delegate macros emit a
//! delegate directly. Every other all-caps macro call at the start of a chunk
//! is dropped.

use super::decl::{self, FunctionSig, Header, PropertySig, Statement};
use super::lexer::{self, DocComment};
use super::specifiers::parse_specifiers;
use crate::error::SymbolParseError;
use crate::types::{
    is_interface_name, Callable, DelegateDecl, DelegateKind, EnumDecl, Location, Param,
    PropertyDecl, Specifiers, TypeAlias, TypeDecl,
};
use std::collections::{BTreeSet, VecDeque};

const REFLECTION_MACROS: &[&str] = &[
    "UCLASS",
    "USTRUCT",
    "UENUM",
    "UINTERFACE",
    "UPROPERTY",
    "UFUNCTION",
    "UDELEGATE",
];

const ACCESS_LABELS: &[&str] = &["public", "protected", "private"];

/// Words followed by `(` inside a body that are not calls.
const NON_CALLS: &[&str] = &[
    "if", "else", "while", "for", "switch", "case", "return", "sizeof", "alignof", "alignas",
    "decltype", "static_cast", "dynamic_cast", "const_cast", "reinterpret_cast", "new",
    "delete", "throw", "catch", "do", "typeid", "noexcept", "static_assert", "co_await",
    "co_return", "co_yield", "operator", "defined", "this",
];

/// Symbols found in one file, before cross-file resolution.
#[derive(Debug, Default)]
pub struct FileSymbols {
    pub types: Vec<TypeDecl>,
    pub enums: Vec<EnumDecl>,
    pub callables: Vec<Callable>,
    pub aliases: Vec<TypeAlias>,
    pub delegates: Vec<DelegateDecl>,
    /// Bodies found outside any type, matched to declarations later.
    pub definitions: Vec<Definition>,
}

/// A function body at namespace scope (`void AActor::Tick(float) { ... }`).
#[derive(Debug, Clone)]
pub struct Definition {
    pub sig: FunctionSig,
    pub namespace: String,
    pub location: Location,
    pub doc: Option<String>,
    /// Names called from the body, sorted.
    pub calls: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub max_depth: usize,
    pub max_statement_len: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_statement_len: 64 * 1024,
        }
    }
}

#[derive(Debug)]
enum Frame {
    /// Empty name for anonymous namespaces.
    Namespace(String),
    Transparent,
    Type { name: String, index: usize },
    Enum { index: Option<usize>, body: Vec<u8> },
    Opaque,
    /// Function body; nested blocks inside it are plain `Opaque` frames.
    Body { target: BodyTarget, calls: BTreeSet<String> },
}

/// Where the calls of a closed body are written.
#[derive(Debug, Clone, Copy)]
enum BodyTarget {
    Callable(usize),
    Definition(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Collect,
    Enum,
    Opaque,
}

#[derive(Debug)]
struct PendingMacro {
    name: String,
    args: String,
}

pub fn scan(source: &str, file: &str, limits: &ScanLimits) -> Result<FileSymbols, SymbolParseError> {
    let lexer::Cleaned { text, docs } = lexer::strip_comments(source)?;
    let mut scanner = Scanner {
        text: &text,
        file,
        limits,
        docs,
        next_doc: 0,
        out: FileSymbols::default(),
        stack: Vec::new(),
        chunk: Vec::new(),
        chunk_line: 1,
        paren_depth: 0,
        group_start: 0,
        groups_closed: 0,
        line: 1,
        pending_macro: None,
        pending_doc: None,
    };
    scanner.run()?;
    Ok(scanner.out)
}

struct Scanner<'a> {
    text: &'a [u8],
    file: &'a str,
    limits: &'a ScanLimits,
    docs: Vec<DocComment>,
    next_doc: usize,
    out: FileSymbols,
    stack: Vec<Frame>,
    chunk: Vec<u8>,
    chunk_line: usize,
    paren_depth: usize,
    /// Chunk offset of the `(` opening the current top-level group.
    group_start: usize,
    groups_closed: usize,
    line: usize,
    pending_macro: Option<PendingMacro>,
    pending_doc: Option<String>,
}

impl<'a> Scanner<'a> {
    fn run(&mut self) -> Result<(), SymbolParseError> {
        let text = self.text;
        let mut i = 0;
        let mut at_line_start = true;

        while i < text.len() {
            let c = text[i];
            if c == b'\n' {
                self.line += 1;
                at_line_start = true;
                self.push_space();
                i += 1;
                continue;
            }
            if c.is_ascii_whitespace() {
                self.push_space();
                i += 1;
                continue;
            }
            if at_line_start && c == b'#' {
                i = self.skip_preprocessor(i);
                continue;
            }
            at_line_start = false;
            self.absorb_docs(i);

            i = match self.mode() {
                Mode::Opaque => self.step_opaque(i)?,
                Mode::Enum => self.step_enum(i)?,
                Mode::Collect => self.step_collect(i)?,
            };
        }
        Ok(())
    }

    fn mode(&self) -> Mode {
        match self.stack.last() {
            Some(Frame::Opaque | Frame::Body { .. }) => Mode::Opaque,
            Some(Frame::Enum { .. }) => Mode::Enum,
            _ => Mode::Collect,
        }
    }

    // ------------------------------------------------------------------------
    // Byte steps
    // ------------------------------------------------------------------------

    fn step_opaque(&mut self, i: usize) -> Result<usize, SymbolParseError> {
        let c = self.text[i];
        match c {
            b'"' => Ok(self.literal_end(i, b'"')),
            b'\'' if !self.is_digit_separator(i) => Ok(self.literal_end(i, b'\'')),
            b'{' => {
                self.push_frame(Frame::Opaque)?;
                Ok(i + 1)
            }
            b'}' => {
                if let Some(Frame::Body { target, calls }) = self.stack.pop() {
                    self.finish_body(target, calls);
                }
                Ok(i + 1)
            }
            c if c == b'_' || c.is_ascii_alphabetic() => Ok(self.step_word(i)),
            _ => Ok(i + 1),
        }
    }

    /// Skips one identifier; records it as a call when `(` follows and a
    /// function body encloses it.
    fn step_word(&mut self, start: usize) -> usize {
        let text = self.text;
        let mut end = start;
        while end < text.len() && (text[end] == b'_' || text[end].is_ascii_alphanumeric()) {
            end += 1;
        }
        // Suffix of a number literal (`1.0f`, `0x1F`).
        if start > 0 && text[start - 1].is_ascii_alphanumeric() {
            return end;
        }
        let mut next = end;
        while next < text.len() && matches!(text[next], b' ' | b'\t') {
            next += 1;
        }
        if text.get(next) != Some(&b'(') {
            return end;
        }
        let name = String::from_utf8_lossy(&text[start..end]);
        if name.len() < 2 || NON_CALLS.contains(&&*name) || is_macro_name(&name) {
            return end;
        }
        let body = self.stack.iter_mut().rev().find_map(|frame| match frame {
            Frame::Body { calls, .. } => Some(calls),
            _ => None,
        });
        if let Some(calls) = body {
            calls.insert(name.into_owned());
        }
        end
    }

    fn finish_body(&mut self, target: BodyTarget, calls: BTreeSet<String>) {
        let calls: Vec<String> = calls.into_iter().collect();
        match target {
            BodyTarget::Callable(idx) => {
                if let Some(callable) = self.out.callables.get_mut(idx) {
                    callable.calls = calls;
                }
            }
            BodyTarget::Definition(idx) => {
                if let Some(def) = self.out.definitions.get_mut(idx) {
                    def.calls = calls;
                }
            }
        }
    }

    fn step_enum(&mut self, i: usize) -> Result<usize, SymbolParseError> {
        let c = self.text[i];
        let end = match c {
            b'"' => self.literal_end(i, b'"'),
            b'}' => {
                self.close_enum();
                return Ok(i + 1);
            }
            _ => i + 1,
        };
        let limit = self.limits.max_statement_len;
        let line = self.line;
        if let Some(Frame::Enum { body, .. }) = self.stack.last_mut() {
            body.extend_from_slice(&self.text[i..end]);
            if body.len() > limit {
                return Err(SymbolParseError::RunawayStatement { line, limit });
            }
        }
        Ok(end)
    }

    fn step_collect(&mut self, i: usize) -> Result<usize, SymbolParseError> {
        let c = self.text[i];
        let mut next = i + 1;
        match c {
            b'"' => {
                next = self.literal_end(i, b'"');
                self.extend_chunk(i, next);
            }
            b'\'' if !self.is_digit_separator(i) => {
                next = self.literal_end(i, b'\'');
                self.extend_chunk(i, next);
            }
            b'(' => {
                if self.paren_depth == 0 {
                    self.group_start = self.chunk.len();
                }
                self.paren_depth += 1;
                self.push_byte(c);
            }
            b')' => {
                self.push_byte(c);
                if self.paren_depth > 0 {
                    self.paren_depth -= 1;
                    if self.paren_depth == 0 {
                        self.on_group_closed();
                    }
                }
            }
            b';' if self.paren_depth == 0 => self.finish_statement(),
            b'{' if self.paren_depth == 0 => self.open_block()?,
            b'}' if self.paren_depth == 0 => self.close_block()?,
            b':' if self.paren_depth == 0 && self.is_access_label(i) => self.reset_chunk(),
            _ => self.push_byte(c),
        }

        if self.chunk.len() > self.limits.max_statement_len {
            return Err(SymbolParseError::RunawayStatement {
                line: self.chunk_line,
                limit: self.limits.max_statement_len,
            });
        }
        Ok(next)
    }

    fn skip_preprocessor(&mut self, start: usize) -> usize {
        let text = self.text;
        let mut j = start;
        loop {
            while j < text.len() && text[j] != b'\n' {
                j += 1;
            }
            let continued = text[start..j]
                .iter()
                .rev()
                .find(|b| !matches!(b, b'\r' | b' ' | b'\t'))
                == Some(&b'\\');
            if continued && j < text.len() {
                self.line += 1;
                j += 1;
                continue;
            }
            return j;
        }
    }

    /// End of a quoted literal; unterminated literals stop at the newline.
    fn literal_end(&self, start: usize, quote: u8) -> usize {
        let text = self.text;
        let mut i = start + 1;
        while i < text.len() {
            match text[i] {
                b'\\' => i += 2,
                b'\n' => return i,
                c if c == quote => return i + 1,
                _ => i += 1,
            }
        }
        text.len()
    }

    fn is_digit_separator(&self, i: usize) -> bool {
        i > 0 && self.text[i - 1].is_ascii_alphanumeric()
    }

    fn is_access_label(&self, i: usize) -> bool {
        if self.text.get(i + 1) == Some(&b':') || (i > 0 && self.text[i - 1] == b':') {
            return false;
        }
        let chunk = String::from_utf8_lossy(&self.chunk);
        let label = chunk.trim();
        ACCESS_LABELS.contains(&label)
    }

    // ------------------------------------------------------------------------
    // Chunk bookkeeping
    // ------------------------------------------------------------------------

    fn push_byte(&mut self, c: u8) {
        if self.chunk.is_empty() {
            self.chunk_line = self.line;
        }
        self.chunk.push(c);
    }

    fn extend_chunk(&mut self, start: usize, end: usize) {
        if self.chunk.is_empty() {
            self.chunk_line = self.line;
        }
        self.chunk.extend_from_slice(&self.text[start..end]);
    }

    fn push_space(&mut self) {
        match self.stack.last_mut() {
            Some(Frame::Opaque | Frame::Body { .. }) => {}
            Some(Frame::Enum { body, .. }) => {
                if body.last().is_some_and(|b| *b != b' ') {
                    body.push(b' ');
                }
            }
            _ => {
                if self.chunk.last().is_some_and(|b| *b != b' ') {
                    self.chunk.push(b' ');
                }
            }
        }
    }

    fn reset_chunk(&mut self) {
        self.chunk.clear();
        self.paren_depth = 0;
        self.group_start = 0;
        self.groups_closed = 0;
    }

    fn chunk_text(&self) -> String {
        String::from_utf8_lossy(&self.chunk).trim().to_string()
    }

    /// Docs that end before `offset` become pending when nothing has been
    /// collected since.
    fn absorb_docs(&mut self, offset: usize) {
        while self.next_doc < self.docs.len() && self.docs[self.next_doc].end <= offset {
            if self.mode() == Mode::Collect && self.chunk.is_empty() {
                self.pending_doc = Some(self.docs[self.next_doc].text.clone());
            }
            self.next_doc += 1;
        }
    }

    fn clear_pending(&mut self) {
        self.pending_macro = None;
        self.pending_doc = None;
    }

    // ------------------------------------------------------------------------
    // Boundaries
    // ------------------------------------------------------------------------

    fn on_group_closed(&mut self) {
        self.groups_closed += 1;
        let chunk = String::from_utf8_lossy(&self.chunk).into_owned();
        let Some(before) = chunk.get(..self.group_start).map(str::trim) else {
            return;
        };

        if self.groups_closed == 1 && is_macro_name(before) {
            let args = chunk
                .get(self.group_start + 1..chunk.len().saturating_sub(1))
                .unwrap_or_default()
                .to_string();
            self.handle_macro(before.to_string(), args);
            self.reset_chunk();
            return;
        }
        if before.ends_with("PURE_VIRTUAL") {
            self.finish_statement();
        }
    }

    fn handle_macro(&mut self, name: String, args: String) {
        if REFLECTION_MACROS.contains(&name.as_str()) {
            self.pending_macro = Some(PendingMacro { name, args });
            return;
        }
        if let Some(parts) = parse_delegate_macro(&name, &args) {
            self.emit_delegate(&name, parts);
        }
    }

    fn finish_statement(&mut self) {
        let text = self.chunk_text();
        if !text.is_empty() {
            let in_type = self.current_type().is_some();
            match decl::classify_statement(&text, in_type) {
                Statement::Function(sig) => {
                    self.emit_callable(sig, false);
                }
                Statement::Properties(props) => self.emit_properties(props),
                Statement::Alias(alias) => self.emit_alias(alias),
                Statement::Ignore => {}
            }
        }
        self.clear_pending();
        self.reset_chunk();
    }

    fn open_block(&mut self) -> Result<(), SymbolParseError> {
        let text = self.chunk_text();
        let frame = match decl::classify_header(&text) {
            Header::Namespace(name) => Frame::Namespace(name),
            Header::Transparent => Frame::Transparent,
            Header::Type(header) => {
                let name = header.name.clone();
                let index = self.emit_type(header);
                Frame::Type { name, index }
            }
            Header::AnonymousType | Header::Opaque => Frame::Opaque,
            Header::Enum(header) => {
                let index = self.emit_enum(header);
                Frame::Enum {
                    index,
                    body: Vec::new(),
                }
            }
            Header::Function(sig) => match self.emit_callable(sig, true) {
                Some(target) => Frame::Body {
                    target,
                    calls: BTreeSet::new(),
                },
                None => Frame::Opaque,
            },
            Header::Property(prop) => {
                self.emit_properties(vec![prop]);
                Frame::Opaque
            }
        };
        self.clear_pending();
        self.reset_chunk();
        self.push_frame(frame)
    }

    fn close_block(&mut self) -> Result<(), SymbolParseError> {
        if self.stack.pop().is_none() {
            return Err(SymbolParseError::UnbalancedBraces { line: self.line });
        }
        self.clear_pending();
        self.reset_chunk();
        Ok(())
    }

    fn close_enum(&mut self) {
        if let Some(Frame::Enum { index, body }) = self.stack.pop() {
            if let Some(decl) = index.and_then(|idx| self.out.enums.get_mut(idx)) {
                decl.values = decl::parse_enum_values(&String::from_utf8_lossy(&body));
            }
        }
        self.reset_chunk();
    }

    fn push_frame(&mut self, frame: Frame) -> Result<(), SymbolParseError> {
        if self.stack.len() >= self.limits.max_depth {
            return Err(SymbolParseError::NestingTooDeep {
                line: self.line,
                limit: self.limits.max_depth,
            });
        }
        self.stack.push(frame);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Scope
    // ------------------------------------------------------------------------

    /// Namespaces and enclosing types joined with `::`.
    fn scope_path(&self) -> String {
        self.stack
            .iter()
            .filter_map(|frame| match frame {
                Frame::Namespace(name) if !name.is_empty() => Some(name.as_str()),
                Frame::Type { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("::")
    }

    fn namespace_path(&self) -> String {
        self.stack
            .iter()
            .filter_map(|frame| match frame {
                Frame::Namespace(name) if !name.is_empty() => Some(name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("::")
    }

    fn type_path(&self) -> String {
        self.stack
            .iter()
            .filter_map(|frame| match frame {
                Frame::Type { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("::")
    }

    fn current_type(&self) -> Option<(&str, usize)> {
        match self.stack.last() {
            Some(Frame::Type { name, index }) => Some((name.as_str(), *index)),
            _ => None,
        }
    }

    fn location(&self) -> Location {
        Location::new(self.file, self.chunk_line)
    }

    /// Take the pending macro when it is one of `accepted`.
    fn take_macro(&mut self, accepted: &[&str]) -> (Option<String>, Specifiers) {
        match self.pending_macro.take() {
            Some(m) if accepted.contains(&m.name.as_str()) => {
                let specs = parse_specifiers(&m.args);
                (Some(m.name), specs)
            }
            _ => (None, Specifiers::new()),
        }
    }

    // ------------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------------

    fn emit_type(&mut self, header: decl::TypeHeader) -> usize {
        let (macro_name, specifiers) = self.take_macro(&["UCLASS", "USTRUCT", "UINTERFACE"]);
        let interfaces: Vec<String> = header
            .bases
            .iter()
            .filter(|b| is_interface_name(base_simple_name(b)))
            .cloned()
            .collect();
        let parent = header
            .bases
            .iter()
            .find(|b| !is_interface_name(base_simple_name(b)))
            .cloned();

        self.out.types.push(TypeDecl {
            name: header.name,
            namespace: self.scope_path(),
            kind: header.kind,
            bases: header.bases,
            parent,
            interfaces,
            methods: Vec::new(),
            properties: Vec::new(),
            doc: self.pending_doc.take(),
            location: self.location(),
            macro_name,
            specifiers,
        });
        self.out.types.len() - 1
    }

    fn emit_enum(&mut self, header: decl::EnumHeader) -> Option<usize> {
        if header.name.is_empty() {
            return None;
        }
        let (macro_name, specifiers) = self.take_macro(&["UENUM"]);
        self.out.enums.push(EnumDecl {
            name: header.name,
            namespace: self.scope_path(),
            scoped: header.scoped,
            underlying: header.underlying,
            values: Vec::new(),
            doc: self.pending_doc.take(),
            location: self.location(),
            macro_name,
            specifiers,
        });
        Some(self.out.enums.len() - 1)
    }

    /// Returns where the body's calls go when `has_body` and a symbol was
    /// emitted.
    fn emit_callable(&mut self, sig: FunctionSig, has_body: bool) -> Option<BodyTarget> {
        let location = self.location();
        let current = self
            .current_type()
            .map(|(name, index)| (name.to_string(), index));

        match current {
            Some((type_name, index)) => {
                if sig.qualifier.is_some() {
                    return None;
                }
                let special = sig.name == simple_name(&type_name)
                    || sig.name.starts_with('~')
                    || sig.name.starts_with("operator");
                if sig.return_type.is_empty() && !special {
                    return None;
                }
                let (macro_name, specifiers) = self.take_macro(&["UFUNCTION"]);
                let callable = build_callable(
                    sig,
                    self.namespace_path(),
                    Some(self.type_path()),
                    location.clone(),
                    has_body.then_some(location),
                    self.pending_doc.take(),
                    macro_name,
                    specifiers,
                );
                if let Some(decl) = self.out.types.get_mut(index) {
                    if !decl.methods.contains(&callable.name) {
                        decl.methods.push(callable.name.clone());
                    }
                }
                self.out.callables.push(callable);
                has_body.then(|| BodyTarget::Callable(self.out.callables.len() - 1))
            }
            None => {
                if sig.return_type.is_empty() {
                    let special = sig.name.starts_with('~')
                        || sig.name.starts_with("operator")
                        || sig
                            .qualifier
                            .as_deref()
                            .is_some_and(|q| simple_name(q) == sig.name);
                    if !special {
                        return None;
                    }
                }
                if has_body {
                    let doc = self.pending_doc.take();
                    self.out.definitions.push(Definition {
                        sig,
                        namespace: self.namespace_path(),
                        location,
                        doc,
                        calls: Vec::new(),
                    });
                    Some(BodyTarget::Definition(self.out.definitions.len() - 1))
                } else {
                    if sig.qualifier.is_none() {
                        let (macro_name, specifiers) = self.take_macro(&["UFUNCTION"]);
                        let callable = build_callable(
                            sig,
                            self.namespace_path(),
                            None,
                            location,
                            None,
                            self.pending_doc.take(),
                            macro_name,
                            specifiers,
                        );
                        self.out.callables.push(callable);
                    }
                    None
                }
            }
        }
    }

    fn emit_properties(&mut self, props: Vec<PropertySig>) {
        let Some((_, index)) = self.current_type() else {
            return;
        };
        let (macro_name, specifiers) = self.take_macro(&["UPROPERTY"]);
        let doc = self.pending_doc.take();
        let line = self.chunk_line;
        if let Some(decl) = self.out.types.get_mut(index) {
            for (n, prop) in props.into_iter().enumerate() {
                decl.properties.push(PropertyDecl {
                    name: prop.name,
                    type_name: prop.type_name,
                    macro_name: macro_name.clone(),
                    specifiers: specifiers.clone(),
                    doc: if n == 0 { doc.clone() } else { None },
                    line,
                });
            }
        }
    }

    fn emit_alias(&mut self, alias: decl::AliasSig) {
        let decl = TypeAlias {
            name: alias.name,
            namespace: self.scope_path(),
            target: alias.target,
            form: alias.form,
            doc: self.pending_doc.take(),
            location: self.location(),
        };
        self.out.aliases.push(decl);
    }

    fn emit_delegate(&mut self, macro_name: &str, parts: DelegateParts) {
        let mut specifiers = Specifiers::new();
        specifiers.insert("macro".to_string(), macro_name.to_string());
        for (key, value) in parts.extra {
            specifiers.insert(key.to_string(), value);
        }
        let (_, reflected) = self.take_macro(&["UDELEGATE"]);
        specifiers.extend(reflected);

        let decl = DelegateDecl {
            name: parts.name,
            namespace: self.scope_path(),
            kind: parts.kind,
            params: parts.params,
            doc: self.pending_doc.take(),
            location: self.location(),
            specifiers,
        };
        self.out.delegates.push(decl);
    }
}

#[allow(clippy::too_many_arguments)]
fn build_callable(
    sig: FunctionSig,
    namespace: String,
    owner: Option<String>,
    declaration: Location,
    definition: Option<Location>,
    doc: Option<String>,
    macro_name: Option<String>,
    specifiers: Specifiers,
) -> Callable {
    Callable {
        name: sig.name,
        namespace,
        owner: owner.filter(|o| !o.is_empty()),
        return_type: sig.return_type,
        params: sig.params,
        is_pure_virtual: sig.is_pure_virtual,
        is_virtual: sig.is_virtual,
        is_static: sig.is_static,
        is_const: sig.is_const,
        doc,
        declaration,
        definition,
        macro_name,
        specifiers,
        calls: Vec::new(),
    }
}

/// `UCLASS`, `GENERATED_BODY`, `DECLARE_DELEGATE_OneParam`: uppercase first
/// letter, then uppercase letters, digits, underscores and the mixed-case
/// suffixes delegate macros use.
fn is_macro_name(s: &str) -> bool {
    if s.len() < 2 || !s.starts_with(|c: char| c.is_ascii_uppercase()) {
        return false;
    }
    if s.starts_with("DECLARE_") {
        return decl::is_ident(s);
    }
    s.bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// Last `::` segment without template arguments.
fn base_simple_name(base: &str) -> &str {
    let base = base.split('<').next().unwrap_or(base).trim();
    simple_name(base)
}

fn simple_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name).trim()
}

// ============================================================================
// Delegate macros
// ============================================================================

#[derive(Debug)]
struct DelegateParts {
    name: String,
    kind: DelegateKind,
    params: Vec<Param>,
    extra: Vec<(&'static str, String)>,
}

fn parse_delegate_macro(macro_name: &str, args: &str) -> Option<DelegateParts> {
    let rest = macro_name.strip_prefix("DECLARE_")?;
    let is_event = rest.contains("EVENT");
    if !is_event && !rest.contains("DELEGATE") {
        return None;
    }
    let dynamic = rest.contains("DYNAMIC");
    let multicast = rest.contains("MULTICAST");
    let kind = if is_event {
        DelegateKind::Event
    } else if rest.contains("SPARSE") {
        DelegateKind::Sparse
    } else if dynamic && multicast {
        DelegateKind::DynamicMulticast
    } else if dynamic {
        DelegateKind::Dynamic
    } else if multicast {
        DelegateKind::Multicast
    } else {
        DelegateKind::Single
    };

    let mut args: VecDeque<String> = decl::split_top_level(args, ',')
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    let mut extra = Vec::new();
    if rest.contains("RetVal") {
        extra.push(("return_type", args.pop_front()?));
    }
    if is_event {
        extra.push(("owner", args.pop_front()?));
    }
    let name = args.pop_front()?;
    if kind == DelegateKind::Sparse {
        extra.push(("owner", args.pop_front()?));
        extra.push(("property", args.pop_front()?));
    }
    if !decl::is_ident(&name) {
        return None;
    }

    let args: Vec<String> = args.into_iter().collect();
    let params = if dynamic {
        args.chunks(2)
            .map(|pair| Param {
                type_name: pair[0].clone(),
                name: pair.get(1).cloned(),
                default: None,
            })
            .collect()
    } else {
        args.into_iter()
            .map(|type_name| Param {
                type_name,
                name: None,
                default: None,
            })
            .collect()
    };

    Some(DelegateParts {
        name,
        kind,
        params,
        extra,
    })
}
