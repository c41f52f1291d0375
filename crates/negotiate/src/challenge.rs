//! `Proxy-Authenticate` challenge parsing
//!
//! A proxy may advertise several schemes, either as separate header lines or
//! comma-separated in one line (`Basic realm="squid", Negotiate`). Each
//! challenge is a scheme name followed by either a token68 blob (how
//! `Negotiate` carries server tokens) or a list of `name=value` auth-params.

use http::HeaderValue;

use crate::error::Result;
use crate::token::NegotiationToken;

/// Scheme name used by SPNEGO over HTTP.
pub const NEGOTIATE: &str = "Negotiate";

/// One parsed authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    scheme: String,
    token68: Option<String>,
    params: Vec<(String, String)>,
}

impl Challenge {
    fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.to_owned(),
            token68: None,
            params: Vec::new(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn is_negotiate(&self) -> bool {
        self.scheme.eq_ignore_ascii_case(NEGOTIATE)
    }

    pub fn token68(&self) -> Option<&str> {
        self.token68.as_deref()
    }

    /// Auth-param lookup, case-insensitive on the name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Server token carried by a `Negotiate <token>` challenge, if any.
    pub fn negotiate_token(&self) -> Result<Option<NegotiationToken>> {
        if !self.is_negotiate() {
            return Ok(None);
        }
        self.token68
            .as_deref()
            .map(NegotiationToken::from_base64)
            .transpose()
    }
}

/// Parse every challenge from a set of `Proxy-Authenticate` header values.
///
/// Values that are not visible ASCII are skipped rather than failing the
/// whole set; a proxy that mangles one header line can still be answered.
pub fn parse_challenges<'a>(values: impl IntoIterator<Item = &'a HeaderValue>) -> Vec<Challenge> {
    values
        .into_iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(parse_challenge_list)
        .collect()
}

/// Parse one header line, which may contain several challenges.
pub fn parse_challenge_list(header: &str) -> Vec<Challenge> {
    let mut challenges: Vec<Challenge> = Vec::new();

    for item in split_outside_quotes(header) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let ws = item.find(char::is_whitespace);
        let eq = item.find('=');

        match (ws, eq) {
            // Bare scheme: "Negotiate"
            (None, None) => challenges.push(Challenge::new(item)),
            // Scheme followed by token68 or its first auth-param
            (Some(ws), eq) if eq.is_none_or(|eq| ws < eq) => {
                let mut challenge = Challenge::new(&item[..ws]);
                let rest = item[ws..].trim();
                if is_token68(rest) {
                    challenge.token68 = Some(rest.to_owned());
                } else if let Some(param) = parse_param(rest) {
                    challenge.params.push(param);
                }
                challenges.push(challenge);
            }
            // Continuation auth-param of the previous challenge
            _ => {
                if let (Some(current), Some(param)) = (challenges.last_mut(), parse_param(item)) {
                    current.params.push(param);
                }
            }
        }
    }

    challenges
}

fn parse_param(item: &str) -> Option<(String, String)> {
    let (name, value) = item.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name.to_owned(), unquote(value.trim())))
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_owned();
    };
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// token68 = 1*( ALPHA / DIGIT / "-" / "." / "_" / "~" / "+" / "/" ) *"="
fn is_token68(s: &str) -> bool {
    let body = s.trim_end_matches('=');
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '+' | '/'))
}

fn split_outside_quotes(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in header.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_negotiate() {
        let challenges = parse_challenge_list("Negotiate");
        assert_eq!(challenges.len(), 1);
        assert!(challenges[0].is_negotiate());
        assert!(challenges[0].token68().is_none());
        assert!(challenges[0].negotiate_token().unwrap().is_none());
    }

    #[test]
    fn negotiate_with_server_token() {
        let challenges = parse_challenge_list("Negotiate oYGgMIGdoAMKAQA=");
        assert_eq!(challenges[0].token68(), Some("oYGgMIGdoAMKAQA="));
        let token = challenges[0].negotiate_token().unwrap().unwrap();
        assert!(!token.is_empty());
    }

    #[test]
    fn scheme_match_is_case_insensitive() {
        let challenges = parse_challenge_list("negotiate");
        assert!(challenges[0].is_negotiate());
    }

    #[test]
    fn comma_separated_list_with_quoted_params() {
        let challenges =
            parse_challenge_list(r#"Basic realm="Squid, proxy-caching", charset="UTF-8", Negotiate, NTLM"#);
        let schemes: Vec<&str> = challenges.iter().map(|c| c.scheme()).collect();
        assert_eq!(schemes, ["Basic", "Negotiate", "NTLM"]);
        assert_eq!(challenges[0].param("realm"), Some("Squid, proxy-caching"));
        assert_eq!(challenges[0].param("CHARSET"), Some("UTF-8"));
    }

    #[test]
    fn escaped_quote_inside_param() {
        let challenges = parse_challenge_list(r#"Basic realm="say \"hi\"""#);
        assert_eq!(challenges[0].param("realm"), Some(r#"say "hi""#));
    }

    #[test]
    fn multiple_header_lines() {
        let values = [
            HeaderValue::from_static("Basic realm=\"proxy\""),
            HeaderValue::from_static("Negotiate"),
        ];
        let challenges = parse_challenges(values.iter());
        assert_eq!(challenges.len(), 2);
        assert!(challenges.iter().any(Challenge::is_negotiate));
    }

    #[test]
    fn non_ascii_header_line_is_skipped() {
        let values = [
            HeaderValue::from_bytes(b"Basic realm=\"caf\xe9\"").unwrap(),
            HeaderValue::from_static("Negotiate"),
        ];
        let challenges = parse_challenges(values.iter());
        assert_eq!(challenges.len(), 1);
        assert!(challenges[0].is_negotiate());
    }

    #[test]
    fn invalid_negotiate_token_is_an_error() {
        let challenges = parse_challenge_list("Negotiate @@@");
        // "@@@" is not token68, so it is treated as nothing usable
        assert!(challenges[0].token68().is_none());
        assert!(challenges[0].negotiate_token().unwrap().is_none());
    }

    #[test]
    fn empty_header_yields_nothing() {
        assert!(parse_challenge_list("").is_empty());
        assert!(parse_challenge_list(" , ,").is_empty());
    }
}
