//! Resource URI template engine
//!
//! A template is a string of the form `<scheme>://<segments>`, where
//! segments are `/`-separated and each segment is either a literal or a
//! placeholder `{name[:type[:spec]][modifier]}`. Compiled forms are
//! cached per-thread so repeated matches against the same template
//! string avoid re-parsing.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use regex::Regex;

use crate::error::RuntimeError;

/// A flat mapping from placeholder name to its extracted (or supplied)
/// string value. Numeric/bool placeholders are stored in their decoded
/// textual form; validation happens at extraction time, not storage time.
pub type ParamBinding = HashMap<String, String>;

/// The declared type of a placeholder.
#[derive(Debug, Clone)]
pub enum PlaceholderType {
    String,
    Int,
    Number,
    Bool,
    /// `pattern:<spec>*` — matches any value whose prefix equals `spec`,
    /// compiled to an anchored `regex::Regex` at parse time.
    Pattern(Regex),
}

impl PartialEq for PlaceholderType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PlaceholderType::String, PlaceholderType::String) => true,
            (PlaceholderType::Int, PlaceholderType::Int) => true,
            (PlaceholderType::Number, PlaceholderType::Number) => true,
            (PlaceholderType::Bool, PlaceholderType::Bool) => true,
            (PlaceholderType::Pattern(a), PlaceholderType::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for PlaceholderType {}

impl PlaceholderType {
    fn name(&self) -> &'static str {
        match self {
            PlaceholderType::String => "string",
            PlaceholderType::Int => "int",
            PlaceholderType::Number => "number",
            PlaceholderType::Bool => "bool",
            PlaceholderType::Pattern(_) => "pattern",
        }
    }

    fn validate(&self, value: &str) -> bool {
        match self {
            PlaceholderType::String => true,
            PlaceholderType::Int => value.parse::<i64>().is_ok(),
            PlaceholderType::Number => value.parse::<f64>().is_ok(),
            PlaceholderType::Bool => value == "true" || value == "false",
            PlaceholderType::Pattern(re) => re.is_match(value),
        }
    }
}

/// The modifier attached to a placeholder, controlling whether a missing
/// value is an error, silently omitted, or replaced by a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Required,
    Optional,
    Default(String),
}

/// A single placeholder descriptor within a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub kind: PlaceholderType,
    pub modifier: Modifier,
}

/// One element of a compiled template's segment sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A compiled template: its scheme plus an ordered sequence of segments.
/// The sequence alternates literal/placeholder boundaries on `/`
/// characters of the original string; two placeholders never abut
/// without an intervening literal.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub original: String,
    pub scheme: String,
    pub segments: Vec<Segment>,
}

thread_local! {
    static COMPILED_CACHE: RefCell<HashMap<String, Rc<CompiledTemplate>>> =
        RefCell::new(HashMap::new());
}

/// Compile `template`, consulting (and populating) the per-thread cache.
fn compiled(template: &str) -> Result<Rc<CompiledTemplate>, RuntimeError> {
    if let Some(hit) = COMPILED_CACHE.with(|c| c.borrow().get(template).cloned()) {
        return Ok(hit);
    }
    let compiled = Rc::new(compile(template)?);
    COMPILED_CACHE.with(|c| {
        c.borrow_mut()
            .insert(template.to_string(), compiled.clone());
    });
    Ok(compiled)
}

/// Parse a template string into its compiled form. Does not touch the
/// thread-local cache; callers that want caching should go through
/// [`compiled`].
fn compile(template: &str) -> Result<CompiledTemplate, RuntimeError> {
    let (scheme, rest) = template.split_once("://").ok_or_else(|| {
        RuntimeError::TemplateCompile(format!("template {template:?} has no scheme separator"))
    })?;
    if scheme.is_empty() {
        return Err(RuntimeError::TemplateCompile(format!(
            "template {template:?} has an empty scheme"
        )));
    }

    let mut segments = Vec::new();
    let mut seen_names = std::collections::HashSet::new();
    let mut prev_was_placeholder = false;
    for raw in split_segments(rest) {
        if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if prev_was_placeholder {
                return Err(RuntimeError::TemplateCompile(format!(
                    "template {template:?} has two adjacent placeholders with no literal between them"
                )));
            }
            let placeholder = parse_placeholder(template, inner)?;
            if !seen_names.insert(placeholder.name.clone()) {
                return Err(RuntimeError::TemplateCompile(format!(
                    "template {template:?} repeats placeholder name {:?}",
                    placeholder.name
                )));
            }
            segments.push(Segment::Placeholder(placeholder));
            prev_was_placeholder = true;
        } else {
            segments.push(Segment::Literal(raw.to_string()));
            prev_was_placeholder = false;
        }
    }

    Ok(CompiledTemplate {
        original: template.to_string(),
        scheme: scheme.to_string(),
        segments,
    })
}

/// Split the part of a template after `scheme://` on `/`, treating a
/// `{...}` placeholder as a single token even if its pattern spec
/// contains a literal `/`.
fn split_segments(rest: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                out.push(&rest[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&rest[start..]);
    out
}

/// Parse the interior of a `{...}` placeholder, i.e. `name[:type[:spec]][modifier]`.
fn parse_placeholder(template: &str, inner: &str) -> Result<Placeholder, RuntimeError> {
    // Modifiers are suffixes: `?` (optional) or `=<default>` (default value).
    let (body, modifier) = if let Some(stripped) = inner.strip_suffix('?') {
        (stripped, Modifier::Optional)
    } else if let Some(eq) = inner.find('=') {
        let (name_and_type, default) = inner.split_at(eq);
        (name_and_type, Modifier::Default(default[1..].to_string()))
    } else {
        (inner, Modifier::Required)
    };

    let mut parts = body.splitn(3, ':');
    let name = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            RuntimeError::TemplateCompile(format!(
                "template {template:?} has a placeholder with an empty name"
            ))
        })?
        .to_string();
    let type_str = parts.next().unwrap_or("string");
    let spec = parts.next();

    let kind = match type_str {
        "string" => PlaceholderType::String,
        "int" => PlaceholderType::Int,
        "number" => PlaceholderType::Number,
        "bool" => PlaceholderType::Bool,
        "pattern" => {
            let spec = spec.ok_or_else(|| {
                RuntimeError::TemplateCompile(format!(
                    "template {template:?} placeholder {name:?} is type pattern but has no spec"
                ))
            })?;
            let prefix = spec.strip_suffix('*').ok_or_else(|| {
                RuntimeError::TemplateCompile(format!(
                    "template {template:?} placeholder {name:?} pattern spec {spec:?} has no trailing *"
                ))
            })?;
            let re = Regex::new(&format!("^{}", regex::escape(prefix))).map_err(|e| {
                RuntimeError::TemplateCompile(format!(
                    "template {template:?} placeholder {name:?} pattern spec {spec:?} did not compile: {e}"
                ))
            })?;
            PlaceholderType::Pattern(re)
        }
        other => {
            return Err(RuntimeError::TemplateCompile(format!(
                "template {template:?} placeholder {name:?} has unknown type {other:?}"
            )))
        }
    };

    Ok(Placeholder { name, kind, modifier })
}

/// Compile `template` and discard the result, surfacing
/// `TemplateCompile` if it is malformed. Used at route-registration
/// time so a bad template fails at startup rather than on first use.
pub fn validate_template(template: &str) -> Result<(), RuntimeError> {
    compiled(template).map(|_| ())
}

/// Does `uri` match `template`? Never fails; a malformed template or a
/// non-matching URI both produce `false`.
pub fn template_matches(uri: &str, template: &str) -> bool {
    template_extract(uri, template).is_ok()
}

/// Match `uri` against `template` and return the extracted parameter
/// binding, or `TemplateMismatch`/`TypeMismatch` on failure.
pub fn template_extract(uri: &str, template: &str) -> Result<ParamBinding, RuntimeError> {
    let compiled = compiled(template)
        .map_err(|e| RuntimeError::TemplateMismatch(format!("template {template:?} malformed: {e}")))?;

    let (scheme, rest) = uri.split_once("://").ok_or_else(|| {
        RuntimeError::TemplateMismatch(format!("uri {uri:?} has no scheme separator"))
    })?;
    if scheme != compiled.scheme {
        return Err(RuntimeError::TemplateMismatch(format!(
            "uri scheme {scheme:?} does not match template scheme {:?}",
            compiled.scheme
        )));
    }

    let uri_segments: Vec<&str> = if rest.is_empty() { Vec::new() } else { rest.split('/').collect() };
    let mut binding = ParamBinding::new();
    match_segments(&compiled.segments, &uri_segments, &mut binding, template)?;
    Ok(binding)
}

fn match_segments(
    template_segs: &[Segment],
    uri_segs: &[&str],
    binding: &mut ParamBinding,
    template: &str,
) -> Result<(), RuntimeError> {
    let Some((head, tail)) = template_segs.split_first() else {
        return if uri_segs.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::TemplateMismatch(format!(
                "uri has trailing segments beyond template {template:?}"
            )))
        };
    };

    match head {
        Segment::Literal(lit) => {
            let Some((first, rest)) = uri_segs.split_first() else {
                return Err(RuntimeError::TemplateMismatch(format!(
                    "uri ended before literal segment {lit:?} in template {template:?}"
                )));
            };
            if first != lit {
                return Err(RuntimeError::TemplateMismatch(format!(
                    "segment {first:?} does not match literal {lit:?} in template {template:?}"
                )));
            }
            match_segments(tail, rest, binding, template)
        }
        Segment::Placeholder(ph) => {
            if tail.is_empty() {
                // Last segment: consumes the remainder of the URI.
                let remainder = uri_segs.join("/");
                return bind_last(ph, &remainder, uri_segs.is_empty(), binding, template);
            }

            let Some((first, rest)) = uri_segs.split_first() else {
                // URI exhausted before reaching this placeholder.
                return match &ph.modifier {
                    Modifier::Optional => match_segments(tail, uri_segs, binding, template),
                    Modifier::Default(d) => {
                        binding.insert(ph.name.clone(), d.clone());
                        match_segments(tail, uri_segs, binding, template)
                    }
                    Modifier::Required => Err(RuntimeError::TemplateMismatch(format!(
                        "uri ended before required placeholder {:?} in template {template:?}",
                        ph.name
                    ))),
                };
            };

            // Optional/default placeholders may be skipped entirely when the
            // following literal still aligns with the current uri segment;
            // try the skip first and fall back to consuming a value.
            match &ph.modifier {
                Modifier::Optional if !first.is_empty() => {
                    let mut trial = binding.clone();
                    if match_segments(tail, uri_segs, &mut trial, template).is_ok() {
                        *binding = trial;
                        return Ok(());
                    }
                }
                Modifier::Default(d) => {
                    let mut trial = binding.clone();
                    trial.insert(ph.name.clone(), d.clone());
                    if match_segments(tail, uri_segs, &mut trial, template).is_ok() {
                        *binding = trial;
                        return Ok(());
                    }
                }
                _ => {}
            }

            if first.is_empty() && matches!(ph.modifier, Modifier::Optional) {
                return match_segments(tail, rest, binding, template);
            }

            if !ph.kind.validate(first) {
                return Err(RuntimeError::TypeMismatch {
                    expected: ph.kind.name(),
                    got: (*first).to_string(),
                });
            }
            binding.insert(ph.name.clone(), (*first).to_string());
            match_segments(tail, rest, binding, template)
        }
    }
}

fn bind_last(
    ph: &Placeholder,
    remainder: &str,
    uri_exhausted: bool,
    binding: &mut ParamBinding,
    template: &str,
) -> Result<(), RuntimeError> {
    if uri_exhausted {
        return match &ph.modifier {
            Modifier::Optional => Ok(()),
            Modifier::Default(d) => {
                binding.insert(ph.name.clone(), d.clone());
                Ok(())
            }
            Modifier::Required => Err(RuntimeError::TemplateMismatch(format!(
                "uri ended before required placeholder {:?} in template {template:?}",
                ph.name
            ))),
        };
    }
    if !ph.kind.validate(remainder) {
        return Err(RuntimeError::TypeMismatch {
            expected: ph.kind.name(),
            got: remainder.to_string(),
        });
    }
    binding.insert(ph.name.clone(), remainder.to_string());
    Ok(())
}

/// Expand `template` against `binding`, producing a concrete URI.
/// Required placeholders without a binding fail with
/// `MissingParameter`; optional placeholders without a binding are
/// omitted, leaving adjacent literals concatenated.
pub fn template_expand(template: &str, binding: &ParamBinding) -> Result<String, RuntimeError> {
    let compiled = compiled(template)?;
    let mut parts: Vec<String> = Vec::new();

    for segment in &compiled.segments {
        match segment {
            Segment::Literal(lit) => parts.push(lit.clone()),
            Segment::Placeholder(ph) => match binding.get(&ph.name) {
                Some(value) => parts.push(value.clone()),
                None => match &ph.modifier {
                    Modifier::Default(d) => parts.push(d.clone()),
                    Modifier::Optional => {}
                    Modifier::Required => {
                        return Err(RuntimeError::MissingParameter(ph.name.clone()))
                    }
                },
            },
        }
    }

    Ok(format!("{}://{}", compiled.scheme, parts.join("/")))
}

impl fmt::Display for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_expand_match_extract() {
        let template = "example://{user}/posts/{post_id:int}";
        let mut binding = ParamBinding::new();
        binding.insert("user".to_string(), "john".to_string());
        binding.insert("post_id".to_string(), "42".to_string());

        let uri = template_expand(template, &binding).unwrap();
        assert_eq!(uri, "example://john/posts/42");
        assert!(template_matches(&uri, template));

        let extracted = template_extract(&uri, template).unwrap();
        assert_eq!(extracted, binding);
    }

    #[test]
    fn extract_rejects_wrong_int_type() {
        let template = "example://{user}/posts/{post_id:int}";
        let err = template_extract("example://john/posts/abc", template).unwrap_err();
        assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    }

    #[test]
    fn trailing_pattern_placeholder_matches_empty_suffix() {
        let template = "files://{path:pattern:docs/*}";
        assert!(template_matches("files://docs/", template));
        assert!(template_matches("files://docs/readme.md", template));
        assert!(!template_matches("files://other/readme.md", template));
    }

    #[test]
    fn optional_placeholder_may_be_skipped() {
        let template = "example://{user}/profile/{tab?}/settings";
        let a = template_extract("example://john/profile/settings", template).unwrap();
        assert_eq!(a.get("user"), Some(&"john".to_string()));
        assert!(!a.contains_key("tab"));

        let b = template_extract("example://john/profile/billing/settings", template).unwrap();
        assert_eq!(b.get("tab"), Some(&"billing".to_string()));
    }

    #[test]
    fn default_placeholder_fills_in_when_uri_ends_early() {
        let template = "example://{user}/page/{n=1}";
        let binding = template_extract("example://john/page", template).unwrap();
        assert_eq!(binding.get("n"), Some(&"1".to_string()));

        let binding = template_extract("example://john/page/7", template).unwrap();
        assert_eq!(binding.get("n"), Some(&"7".to_string()));
    }

    #[test]
    fn expand_omits_missing_optional_and_fails_missing_required() {
        let template = "example://{user}/profile/{tab?}";
        let mut binding = ParamBinding::new();
        binding.insert("user".to_string(), "john".to_string());
        let uri = template_expand(template, &binding).unwrap();
        assert_eq!(uri, "example://john/profile");

        let empty = ParamBinding::new();
        let err = template_expand(template, &empty).unwrap_err();
        assert!(matches!(err, RuntimeError::MissingParameter(_)));
    }

    #[test]
    fn no_route_falls_back_to_resource_not_found_at_router_layer() {
        // template engine itself reports TemplateMismatch; routers translate
        // that into ResourceNotFound. Verified here at the template layer only.
        let template = "example://{user}/posts/{post_id:int}";
        let err = template_extract("other://john/posts/42", template).unwrap_err();
        assert!(matches!(err, RuntimeError::TemplateMismatch(_)));
    }

    #[test]
    fn compiled_form_is_cached_per_thread() {
        let template = "example://{user}";
        let first = compiled(template).unwrap();
        let second = compiled(template).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }
}
