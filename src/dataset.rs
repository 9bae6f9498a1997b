//! Loading the article dataset that feeds the document index.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Articles beyond this count are ignored unless the caller asks otherwise.
pub const DEFAULT_ARTICLE_LIMIT: usize = 150;

/// Newsletter sign-off; everything from here on is boilerplate.
const FOOTER_MARKER: &str = "\n\nThat's it for today, see ya";

const ARTICLE_URL_PREFIX: &str = "https://medium.com/p/";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset is not a JSON array of articles: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("article #{index} has an invalid id")]
    InvalidId { index: usize },
}

/// A cleaned article ready for indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub content: String,
    pub link: String,
}

#[derive(Deserialize)]
struct RawArticle {
    id: serde_json::Value,
    content: String,
    #[serde(default)]
    link: Option<String>,
}

/// Reads at most `limit` articles from a JSON file.
pub fn load_articles(path: impl AsRef<Path>, limit: usize) -> Result<Vec<Article>, DatasetError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_articles(&raw, limit)
}

/// Parses a JSON array of articles, keeping the first `limit`.
pub fn parse_articles(json: &str, limit: usize) -> Result<Vec<Article>, DatasetError> {
    let raw: Vec<RawArticle> = serde_json::from_str(json)?;

    raw.into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, article)| {
            let id = match article.id {
                serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return Err(DatasetError::InvalidId { index }),
            };
            let link = article
                .link
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| format!("{ARTICLE_URL_PREFIX}{id}"));

            Ok(Article {
                content: strip_footer(&article.content).to_string(),
                id,
                link,
            })
        })
        .collect()
}

/// Cuts the body at the newsletter footer, if present.
pub fn strip_footer(content: &str) -> &str {
    content
        .split(FOOTER_MARKER)
        .next()
        .unwrap_or(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn strip_footer_drops_sign_off() {
        let body = "Angular 17 ships deferrable views.\n\nThat's it for today, see ya next week!";
        assert_eq!(strip_footer(body), "Angular 17 ships deferrable views.");
        assert_eq!(strip_footer("no footer here"), "no footer here");
    }

    #[test]
    fn parse_derives_link_from_id() {
        let articles = parse_articles(r#"[{"id": "abc123", "content": "Body"}]"#, 10).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].link, "https://medium.com/p/abc123");
    }

    #[test]
    fn explicit_link_wins() {
        let articles = parse_articles(
            r#"[{"id": 7, "content": "Body", "link": "https://blog.example/7"}]"#,
            10,
        )
        .unwrap();
        assert_eq!(articles[0].id, "7");
        assert_eq!(articles[0].link, "https://blog.example/7");
    }

    #[test]
    fn parse_respects_limit() {
        let json = r#"[
            {"id": "a", "content": "1"},
            {"id": "b", "content": "2"},
            {"id": "c", "content": "3"}
        ]"#;
        let articles = parse_articles(json, 2).unwrap();
        let ids: Vec<&str> = articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn invalid_id_is_reported_with_index() {
        let err = parse_articles(r#"[{"id": "ok", "content": "x"}, {"id": null, "content": "y"}]"#, 10)
            .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidId { index: 1 }));
    }

    #[test]
    fn load_articles_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id": "x", "content": "hello"}}]"#).unwrap();

        let articles = load_articles(file.path(), DEFAULT_ARTICLE_LIMIT).unwrap();
        assert_eq!(articles[0].content, "hello");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_articles("/definitely/not/here.json", 10).unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }
}
