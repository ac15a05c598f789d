//! Author string parsing
//!
//! Splits `Name <email>` author headers into identity parts and expands the
//! pair-programming forms (`"A, B and C <email>"`, inline `Co-authored-by`
//! fragments) into multiple author strings sharing the trailing email.

use std::sync::OnceLock;

use regex::Regex;

/// Parsed identity triple from one raw author string. The username slot is
/// always empty for git sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorIdent {
    pub name: String,
    pub email: String,
}

fn authors_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Example: David Woodhouse <dwmw2@infradead.org> and Tilman Schmidt <t@imap.cc>
    RE.get_or_init(|| {
        Regex::new(r"(?P<first_authors>.* .*) and (?P<last_author>.* .*) (?P<email>.*)")
            .expect("valid regex")
    })
}

fn co_authors_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Example: Co-authored-by: Andi Kleen <ak@suse.de>
    RE.get_or_init(|| {
        Regex::new(r"Co-authored-by:(?P<author>.* .*)<(?P<email>.*)>").expect("valid regex")
    })
}

/// Minimal syntactic email check; the domain is not verified.
pub fn is_valid_email(email: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[^@\s<>]+@[^@\s<>]+$").expect("valid regex"));
    re.is_match(email)
}

/// Split a raw `Name <email>` author string into its identity parts.
///
/// Everything before the first `<` is the name; the text up to the next `>`
/// is the email. A syntactically invalid email is cleared, the name kept.
pub fn parse_author(raw: &str) -> AuthorIdent {
    let mut fields = raw.splitn(2, '<');
    let name = fields.next().unwrap_or_default().trim().to_string();
    let mut email = fields
        .next()
        .and_then(|rest| rest.split('>').next())
        .unwrap_or_default()
        .trim()
        .to_string();
    if !email.is_empty() && !is_valid_email(&email) {
        email.clear();
    }
    AuthorIdent { name, email }
}

fn push_unique(authors: &mut Vec<String>, author: String) {
    if !author.is_empty() && !authors.contains(&author) {
        authors.push(author);
    }
}

/// Expand a pair-programming author value into individual author strings.
///
/// Returns `None` when the value does not look like a multi-author field.
pub fn split_authors(raw: &str) -> Option<Vec<String>> {
    let mut authors: Vec<String> = Vec::new();

    if let Some(caps) = authors_re().captures(raw) {
        let mut email = caps["email"].trim().to_string();
        if !(email.contains('<') && email.contains('@') && email.contains('>')) {
            email.clear();
        }
        for auth in caps["first_authors"].split(',') {
            let mut auth = auth.trim().to_string();
            if !email.is_empty()
                && !(auth.contains('<') && auth.contains('@') && auth.contains('>'))
            {
                auth.push(' ');
                auth.push_str(&email);
            }
            push_unique(&mut authors, auth);
        }
        let mut last = caps["last_author"].trim().to_string();
        if !email.is_empty() && !(last.contains('<') && last.contains('@') && last.contains('>'))
        {
            last.push(' ');
            last.push_str(&email);
        }
        push_unique(&mut authors, last);
    }

    for caps in co_authors_re().captures_iter(raw) {
        let mut email = caps["email"].trim().to_string();
        if !email.contains('@') {
            email.clear();
        }
        let mut auth = caps["author"].trim().to_string();
        if !email.is_empty() && !auth.contains('@') {
            auth.push_str(" <");
            auth.push_str(&email);
            auth.push('>');
        }
        push_unique(&mut authors, auth);
    }

    if authors.is_empty() {
        None
    } else {
        Some(authors)
    }
}

/// Resolve an author header into the full author set and the first author.
///
/// In pair-programming mode the multi-author forms are expanded; otherwise
/// (or when nothing matches) the raw value stands alone.
pub fn author_set(raw: &str, pair_programming: bool) -> (Vec<String>, String) {
    if pair_programming {
        if let Some(authors) = split_authors(raw) {
            let first = authors[0].clone();
            return (authors, first);
        }
    }
    (vec![raw.to_string()], raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_author() {
        let ident = parse_author("Alice <a@x>");
        assert_eq!(ident.name, "Alice");
        assert_eq!(ident.email, "a@x");
    }

    #[test]
    fn invalid_email_cleared_name_kept() {
        let ident = parse_author("Alice <not-an-email>");
        assert_eq!(ident.name, "Alice");
        assert_eq!(ident.email, "");

        let ident = parse_author("Bob Jones");
        assert_eq!(ident.name, "Bob Jones");
        assert_eq!(ident.email, "");
    }

    #[test]
    fn pair_programming_shares_trailing_email() {
        let (authors, first) = author_set("Ann Alpha and Bob Beta <b@x>", true);
        assert_eq!(authors, vec!["Ann Alpha <b@x>", "Bob Beta <b@x>"]);
        assert_eq!(first, "Ann Alpha <b@x>");
    }

    #[test]
    fn comma_separated_first_authors() {
        let (authors, _) = author_set("Ann Alpha, Cid Gamma and Bob Beta <b@x>", true);
        assert_eq!(
            authors,
            vec!["Ann Alpha <b@x>", "Cid Gamma <b@x>", "Bob Beta <b@x>"]
        );
    }

    #[test]
    fn inline_co_authored_by_fragments() {
        let raw = "Co-authored-by: Andi Kleen <ak@suse.de>\nCo-authored-by: Jan Novak <jn@suse.de>";
        let authors = split_authors(raw).unwrap();
        assert_eq!(authors.len(), 2);
        assert!(authors[0].contains("Andi Kleen"));
        assert!(authors[1].contains("Jan Novak"));
    }

    #[test]
    fn single_author_passthrough() {
        let (authors, first) = author_set("Alice <a@x>", true);
        assert_eq!(authors, vec!["Alice <a@x>"]);
        assert_eq!(first, "Alice <a@x>");

        let (authors, _) = author_set("Ann Alpha and Bob Beta <b@x>", false);
        assert_eq!(authors, vec!["Ann Alpha and Bob Beta <b@x>"]);
    }

    #[test]
    fn email_syntax_boundaries() {
        assert!(is_valid_email("a@x"));
        assert!(is_valid_email("first.last@sub.example.com"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@x"));
        assert!(!is_valid_email("spaces in@x"));
    }
}
