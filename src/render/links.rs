use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(<a\b[^>]*?\shref\s*=\s*")(https?://[^"]*)(")"#).expect("href pattern is valid")
    })
}

/// Host part of an absolute http(s) URL, without port or credentials.
pub fn host_of(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

/// Tags links to other sites with `ref=<site host>`. Links to the site itself,
/// links already carrying a `ref` parameter and non-http links are left alone.
pub fn add_outbound_ref(html: &str, site_url: &str) -> String {
    let Some(site_host) = host_of(site_url) else {
        return html.to_string();
    };

    href_regex()
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let url = &caps[2];
            let same_site = host_of(url).is_some_and(|h| h.eq_ignore_ascii_case(site_host));
            let already_tagged = url.contains("?ref=") || url.contains("&ref=") || url.contains("&amp;ref=");
            if same_site || already_tagged || url.contains("%%{") {
                return caps[0].to_string();
            }

            let (base, fragment) = match url.split_once('#') {
                Some((b, f)) => (b, Some(f)),
                None => (url, None),
            };
            let sep = if base.contains('?') { "&" } else { "?" };
            let mut tagged = format!("{}{}ref={}", base, sep, site_host);
            if let Some(fragment) = fragment {
                tagged.push('#');
                tagged.push_str(fragment);
            }
            format!("{}{}{}", &caps[1], tagged, &caps[3])
        })
        .into_owned()
}

pub fn unsubscribe_url(site_url: &str, member_uuid: Option<Uuid>, newsletter: Option<Uuid>) -> String {
    let base = format!("{}/unsubscribe/", site_url.trim_end_matches('/'));
    match member_uuid {
        None => format!("{}?preview=1", base),
        Some(uuid) => match newsletter {
            Some(newsletter) => format!("{}?uuid={}&newsletter={}", base, uuid, newsletter),
            None => format!("{}?uuid={}", base, uuid),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://example.com/blog"), Some("example.com"));
        assert_eq!(host_of("http://user@example.com:8080?x"), Some("example.com"));
        assert_eq!(host_of("mailto:a@b.c"), None);
    }

    #[test]
    fn test_outbound_links_get_ref() {
        let html = concat!(
            r#"<a href="https://other.org/page">a</a>"#,
            r#"<a class="x" href="https://other.org/?q=1#top">b</a>"#,
            r#"<a href="https://blog.test/post">c</a>"#,
            r#"<a href="mailto:hi@blog.test">d</a>"#,
            r#"<a href="https://other.org/?ref=elsewhere">e</a>"#,
        );
        assert_eq!(
            add_outbound_ref(html, "https://blog.test"),
            concat!(
                r#"<a href="https://other.org/page?ref=blog.test">a</a>"#,
                r#"<a class="x" href="https://other.org/?q=1&ref=blog.test#top">b</a>"#,
                r#"<a href="https://blog.test/post">c</a>"#,
                r#"<a href="mailto:hi@blog.test">d</a>"#,
                r#"<a href="https://other.org/?ref=elsewhere">e</a>"#,
            )
        );
    }

    #[test]
    fn test_unsubscribe_url() {
        let member = Uuid::parse_str("7f0c3c06-55f5-4b8c-9d19-6a4e2a2a3a11").unwrap();
        let newsletter = Uuid::parse_str("0b6a4bcd-0000-4000-8000-000000000001").unwrap();

        assert_eq!(
            unsubscribe_url("https://blog.test/", Some(member), None),
            "https://blog.test/unsubscribe/?uuid=7f0c3c06-55f5-4b8c-9d19-6a4e2a2a3a11"
        );
        assert_eq!(
            unsubscribe_url("https://blog.test", Some(member), Some(newsletter)),
            "https://blog.test/unsubscribe/?uuid=7f0c3c06-55f5-4b8c-9d19-6a4e2a2a3a11&newsletter=0b6a4bcd-0000-4000-8000-000000000001"
        );
        assert_eq!(
            unsubscribe_url("https://blog.test", None, None),
            "https://blog.test/unsubscribe/?preview=1"
        );
    }
}
