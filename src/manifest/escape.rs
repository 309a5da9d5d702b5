//! Reversible escaping of first-boot agent placeholders
//!
//! cloud-init renders the whole payload as a jinja template on the bootstrap
//! node. Manifests that are only *stored* there (and later handed to nodes
//! created by Cluster API) must keep their `{{ ... }}` placeholders, so each
//! span is rewritten into a jinja expression that evaluates to itself:
//!
//! ```text
//! {{ ds.meta_data.region }}    ->  {{ '{{ ds.meta_data.region }}' }}
//! '{{ ds.meta_data.region }}'  ->  '{{ "{{ ds.meta_data.region }}" }}'
//! ```
//!
//! The scanner walks the text once and never touches spans that are already
//! in one of the inert forms, so escaping is safe to apply to input that was
//! partially escaped by hand.

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// The two inert spellings: (opening, closing)
const INERT_FORMS: [(&str, &str); 2] = [("{{ '{{", "}}' }}"), ("{{ \"{{", "}}\" }}")];

/// Rewrite every live `{{ ... }}` span into its inert form
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        let (before, span) = rest.split_at(start);
        out.push_str(before);

        if let Some(len) = inert_span_len(span) {
            out.push_str(&span[..len]);
            rest = &span[len..];
            continue;
        }

        let body = &span[OPEN.len()..];
        let Some(end) = body.find(CLOSE) else {
            out.push_str(span);
            return out;
        };
        let inner = &body[..end];
        let after = &body[end + CLOSE.len()..];

        let in_single_quotes = before.ends_with('\'') && after.starts_with('\'');
        let (open, close) = if in_single_quotes || inner.contains('\'') {
            INERT_FORMS[1]
        } else {
            INERT_FORMS[0]
        };
        out.push_str(open);
        out.push_str(inner);
        out.push_str(close);
        rest = after;
    }

    out.push_str(rest);
    out
}

/// Turn inert spans back into live `{{ ... }}` placeholders
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        let (before, span) = rest.split_at(start);
        out.push_str(before);

        match inert_parts(span) {
            Some((inner, len)) => {
                out.push_str(OPEN);
                out.push_str(inner);
                out.push_str(CLOSE);
                rest = &span[len..];
            }
            None => {
                out.push_str(OPEN);
                rest = &span[OPEN.len()..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Inner text and total length of an inert span starting at `span[0]`
fn inert_parts(span: &str) -> Option<(&str, usize)> {
    INERT_FORMS.iter().find_map(|(open, close)| {
        let body = span.strip_prefix(open)?;
        let end = body.find(close)?;
        Some((&body[..end], open.len() + end + close.len()))
    })
}

fn inert_span_len(span: &str) -> Option<usize> {
    inert_parts(span).map(|(_, len)| len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn escapes_bare_placeholder() {
        assert_eq!(
            escape("providerID: linode://{{ ds.meta_data.id }}"),
            "providerID: linode://{{ '{{ ds.meta_data.id }}' }}"
        );
    }

    #[test]
    fn single_quoted_scalar_uses_double_quoted_form() {
        assert_eq!(
            escape("region: '{{ ds.meta_data.region }}'"),
            "region: '{{ \"{{ ds.meta_data.region }}\" }}'"
        );
    }

    #[test]
    fn already_inert_spans_are_untouched() {
        let text = "a: {{ '{{ x }}' }}\nb: '{{ \"{{ y }}\" }}'\n";
        assert_eq!(escape(text), text);
    }

    #[test]
    fn unclosed_placeholder_is_left_alone() {
        let text = "echo {{ broken";
        assert_eq!(escape(text), text);
        assert_eq!(unescape(text), text);
    }

    #[test]
    fn unescape_reverses_hand_written_inert_form() {
        assert_eq!(
            unescape("sed -i 's/x/{{ '{{ ds.meta_data.region }}' }}/' f"),
            "sed -i 's/x/{{ ds.meta_data.region }}/' f"
        );
    }

    #[test]
    fn text_without_placeholders_is_identity() {
        let text = "apiVersion: v1\nkind: Secret\n";
        assert_eq!(escape(text), text);
        assert_eq!(unescape(text), text);
    }

    fn segment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z0-9 :./\\n-]{0,12}",
            "[a-z_.]{1,12}".prop_map(|v| format!("{{{{ {v} }}}}")),
            "[a-z_.]{1,12}".prop_map(|v| format!("'{{{{ {v} }}}}'")),
            "[a-z_.]{1,12}".prop_map(|v| format!("{{{{{v}}}}}")),
        ]
    }

    fn manifest_text() -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 0..10).prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn unescape_inverts_escape(text in manifest_text()) {
            prop_assert_eq!(unescape(&escape(&text)), text);
        }

        #[test]
        fn escaping_twice_is_escaping_once(text in manifest_text()) {
            let once = escape(&text);
            prop_assert_eq!(escape(&once), once);
        }
    }
}
