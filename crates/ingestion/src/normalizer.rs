//! Raw search record to typed relational rows
//!
//! Records may arrive nested (`index_terms.author_terms.terms` as a JSON
//! path) or flattened (a single `"index_terms.author_terms.terms"` key whose
//! value is a list serialized as JSON or as a Python literal). Both shapes
//! are accepted.

use crate::errors::{IngestionError, Result};
use crate::fetcher::RawRecord;
use chrono::NaiveDate;
use papermap_common::db::{AuthorRecord, NormalizedPaper};
use serde_json::Value;
use tracing::warn;

const AUTHOR_TERMS: &str = "index_terms.author_terms.terms";
const SUBJECT_TERMS: &str = "index_terms.ieee_terms.terms";
const DYNAMIC_TERMS: &str = "index_terms.dynamic_index_terms.terms";
const AUTHORS: &str = "authors.authors";

/// Normalized rows of one page plus the records that were rejected
#[derive(Debug, Default)]
pub struct NormalizedPage {
    pub papers: Vec<NormalizedPaper>,
    pub rejected: Vec<IngestionError>,
}

/// Normalize every record of a page, isolating failures per record
pub fn normalize_page(records: Vec<RawRecord>) -> NormalizedPage {
    let mut page = NormalizedPage::default();
    for record in &records {
        match normalize(record) {
            Ok(paper) => page.papers.push(paper),
            Err(e) => {
                warn!(error = %e, "Skipping malformed record");
                page.rejected.push(e);
            }
        }
    }
    page
}

/// Map one raw record onto a [`NormalizedPaper`]
pub fn normalize(record: &RawRecord) -> Result<NormalizedPaper> {
    let external_id = lookup(record, "article_number")
        .and_then(id_string)
        .or_else(|| lookup(record, "is_number").and_then(id_string))
        .ok_or_else(|| IngestionError::malformed(describe(record), "missing article_number and is_number"))?;

    let title = lookup(record, "title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| IngestionError::malformed(&external_id, "missing title"))?
        .to_string();

    let abstract_text = lookup(record, "abstract")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let insert_date = lookup(record, "insert_date").and_then(|v| match v {
        Value::String(s) => parse_compact_date(s),
        Value::Number(n) => parse_compact_date(&n.to_string()),
        _ => None,
    });

    let publication_year = lookup(record, "publication_year").and_then(|v| match v {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    let author_terms = string_list(record, AUTHOR_TERMS, &external_id)?;
    let subject_terms = string_list(record, SUBJECT_TERMS, &external_id)?;
    let dynamic_terms = string_list(record, DYNAMIC_TERMS, &external_id)?;
    let authors = author_list(record, &external_id)?;

    let prompt = build_prompt(
        &title,
        &abstract_text,
        author_terms.iter().chain(&subject_terms).chain(&dynamic_terms).map(String::as_str),
    );

    Ok(NormalizedPaper {
        insert_date,
        publication_year,
        download_count: count(record, "download_count"),
        citing_patent_count: count(record, "citing_patent_count"),
        external_id,
        title,
        abstract_text,
        authors,
        author_terms,
        subject_terms,
        dynamic_terms,
        prompt,
    })
}

/// Parse `YYYYMMDD`; anything else is `None`
pub fn parse_compact_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

/// `title: {title} - abstract: {abstract} - index_terms: {t1, t2, ...}`
pub fn build_prompt<'a>(title: &str, abstract_text: &str, terms: impl IntoIterator<Item = &'a str>) -> String {
    let terms: Vec<&str> = terms.into_iter().collect();
    format!(
        "title: {} - abstract: {} - index_terms: {}",
        title,
        abstract_text,
        terms.join(", ")
    )
}

/// Resolve a dotted path, trying the flattened key first
fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(v) = record.get(path) {
        return Some(v).filter(|v| !v.is_null());
    }
    path.split('.')
        .try_fold(record, |node, key| node.get(key))
        .filter(|v| !v.is_null())
}

/// Lists arrive as JSON arrays, JSON text or Python literal text
fn decode_list(value: &Value, external_id: &str, field: &str) -> Result<Vec<Value>> {
    let not_a_list = || IngestionError::malformed(external_id, format!("{} is not a list", field));

    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(raw) if raw.trim().is_empty() => Ok(Vec::new()),
        Value::String(raw) => {
            let parsed = serde_json::from_str::<Value>(raw).or_else(|json_err| {
                python_literal_to_json(raw)
                    .and_then(|text| serde_json::from_str::<Value>(&text).ok())
                    .ok_or_else(|| {
                        IngestionError::malformed(
                            external_id,
                            format!("{} is neither JSON nor a Python literal: {}", field, json_err),
                        )
                    })
            })?;
            match parsed {
                Value::Array(items) => Ok(items),
                _ => Err(not_a_list()),
            }
        }
        _ => Err(not_a_list()),
    }
}

/// Rewrite Python literal text (quoted strings, `None`/`True`/`False`,
/// tuples, trailing commas) as JSON. `None` for anything else.
fn python_literal_to_json(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let mut text = String::new();
                loop {
                    match chars.next()? {
                        q if q == c => break,
                        '\\' => match chars.next()? {
                            'n' => text.push('\n'),
                            't' => text.push('\t'),
                            'r' => text.push('\r'),
                            'x' => text.push(hex_char(&mut chars, 2)?),
                            'u' => text.push(hex_char(&mut chars, 4)?),
                            escaped @ ('\\' | '\'' | '"') => text.push(escaped),
                            other => {
                                text.push('\\');
                                text.push(other);
                            }
                        },
                        other => text.push(other),
                    }
                }
                out.push_str(&serde_json::to_string(&text).ok()?);
            }
            '(' => out.push('['),
            ')' => out.push(']'),
            ',' => {
                let next = chars.clone().find(|n| !n.is_whitespace());
                if !matches!(next, Some(']' | '}' | ')')) {
                    out.push(',');
                }
            }
            c if c.is_ascii_alphabetic() && !out.ends_with(|p: char| p.is_ascii_digit() || p == '.') => {
                let mut word = String::from(c);
                while let Some(&n) = chars.peek() {
                    if !(n.is_ascii_alphanumeric() || n == '_') {
                        break;
                    }
                    word.push(n);
                    chars.next();
                }
                out.push_str(match word.as_str() {
                    "None" => "null",
                    "True" => "true",
                    "False" => "false",
                    _ => return None,
                });
            }
            other => out.push(other),
        }
    }

    Some(out)
}

fn hex_char(chars: &mut impl Iterator<Item = char>, digits: usize) -> Option<char> {
    let code: String = chars.take(digits).collect();
    if code.len() != digits {
        return None;
    }
    char::from_u32(u32::from_str_radix(&code, 16).ok()?)
}

fn string_list(record: &Value, path: &str, external_id: &str) -> Result<Vec<String>> {
    let Some(value) = lookup(record, path) else {
        return Ok(Vec::new());
    };

    decode_list(value, external_id, path)?
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(IngestionError::malformed(
                external_id,
                format!("{} contains a non-string term: {}", path, other),
            )),
        })
        .collect()
}

fn author_list(record: &Value, external_id: &str) -> Result<Vec<AuthorRecord>> {
    let Some(value) = lookup(record, AUTHORS) else {
        return Ok(Vec::new());
    };

    let mut items = decode_list(value, external_id, AUTHORS)?;
    // author_order wins over list position when present
    items.sort_by_key(|a| a.get("author_order").and_then(Value::as_i64).unwrap_or(i64::MAX));

    items
        .iter()
        .map(|author| {
            let full_name = author
                .get("full_name")
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| IngestionError::malformed(external_id, "author without full_name"))?;

            Ok(AuthorRecord {
                external_id: author.get("id").and_then(id_string),
                full_name: full_name.to_string(),
                affiliation: author
                    .get("affiliation")
                    .and_then(Value::as_str)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string),
            })
        })
        .collect()
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn count(record: &Value, path: &str) -> i64 {
    match lookup(record, path) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn describe(record: &Value) -> String {
    lookup(record, "title")
        .and_then(Value::as_str)
        .map(|t| format!("'{}'", t))
        .unwrap_or_else(|| "<untitled>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested_record() -> Value {
        json!({
            "article_number": "10500001",
            "is_number": 10499000,
            "title": "T",
            "abstract": "A",
            "insert_date": "20240315",
            "publication_year": 2024,
            "download_count": 12,
            "citing_patent_count": 1,
            "index_terms": {
                "author_terms": { "terms": ["x"] },
                "ieee_terms": { "terms": ["y"] },
                "dynamic_index_terms": { "terms": ["z"] }
            },
            "authors": {
                "authors": [
                    { "id": 37089, "full_name": "Second Author", "affiliation": "Uni B", "author_order": 2 },
                    { "id": 37088, "full_name": "First Author", "affiliation": "Uni A", "author_order": 1 }
                ]
            }
        })
    }

    #[test]
    fn test_prompt_from_known_fields() {
        let paper = normalize(&nested_record()).unwrap();
        assert_eq!(paper.prompt, "title: T - abstract: A - index_terms: x, y, z");
    }

    #[test]
    fn test_nested_record_fields() {
        let paper = normalize(&nested_record()).unwrap();
        assert_eq!(paper.external_id, "10500001");
        assert_eq!(paper.insert_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(paper.publication_year, Some(2024));
        assert_eq!(paper.download_count, 12);
        assert_eq!(paper.citing_patent_count, 1);
        assert_eq!(paper.subject_terms, vec!["y"]);
        assert_eq!(paper.authors.len(), 2);
        assert_eq!(paper.authors[0].full_name, "First Author");
        assert_eq!(paper.authors[0].external_id.as_deref(), Some("37088"));
        assert_eq!(paper.authors[1].affiliation.as_deref(), Some("Uni B"));
    }

    #[test]
    fn test_flattened_record_with_encoded_lists() {
        let record = json!({
            "is_number": 9001,
            "title": "Flat",
            "abstract": "Body",
            "publication_year": "2023",
            "index_terms.author_terms.terms": "[\"a1\", \"a2\"]",
            "index_terms.ieee_terms.terms": "[]",
            "authors.authors": "[{\"id\": 1, \"full_name\": \"Only Author\", \"affiliation\": \"\"}]"
        });

        let paper = normalize(&record).unwrap();
        assert_eq!(paper.external_id, "9001");
        assert_eq!(paper.publication_year, Some(2023));
        assert_eq!(paper.author_terms, vec!["a1", "a2"]);
        assert!(paper.subject_terms.is_empty());
        assert!(paper.dynamic_terms.is_empty());
        assert_eq!(paper.authors[0].affiliation, None);
        assert_eq!(paper.prompt, "title: Flat - abstract: Body - index_terms: a1, a2");
    }

    #[test]
    fn test_flattened_record_with_python_literal_lists() {
        let record = json!({
            "is_number": 9001,
            "title": "T",
            "abstract": "A",
            "index_terms.author_terms.terms": "['x']",
            "index_terms.ieee_terms.terms": "[\"y\"]",
            "index_terms.dynamic_index_terms.terms": ["z"],
            "authors.authors": "[{'id': 1, 'full_name': 'Ada', 'affiliation': 'Lab', 'is_corresponding': True}, \
                                 {'id': 2, 'full_name': \"O'Neil\", 'affiliation': None,},]"
        });

        let paper = normalize(&record).unwrap();
        assert_eq!(paper.prompt, "title: T - abstract: A - index_terms: x, y, z");
        assert_eq!(paper.authors.len(), 2);
        assert_eq!(paper.authors[0].full_name, "Ada");
        assert_eq!(paper.authors[0].external_id.as_deref(), Some("1"));
        assert_eq!(paper.authors[0].affiliation.as_deref(), Some("Lab"));
        assert_eq!(paper.authors[1].full_name, "O'Neil");
        assert_eq!(paper.authors[1].affiliation, None);
    }

    #[test]
    fn test_python_literal_conversion() {
        assert_eq!(python_literal_to_json("['a', 'b\\'c']").as_deref(), Some(r#"["a", "b'c"]"#));
        assert_eq!(python_literal_to_json("('a', 1.5e3, False)").as_deref(), Some(r#"["a", 1.5e3, false]"#));
        assert_eq!(python_literal_to_json("[{'k': None}]").as_deref(), Some(r#"[{"k": null}]"#));
        assert_eq!(python_literal_to_json("[open('x')]"), None);
        assert_eq!(python_literal_to_json("['unterminated"), None);
    }

    #[test]
    fn test_unparseable_list_text_is_malformed() {
        let record = json!({
            "article_number": "77",
            "title": "T",
            "index_terms.author_terms.terms": "[{not json"
        });
        let err = normalize(&record).unwrap_err();
        assert!(matches!(err, IngestionError::MalformedRecord { ref record, .. } if record == "77"));
    }

    #[test]
    fn test_bad_dates_become_none() {
        assert_eq!(parse_compact_date("20241301"), None);
        assert_eq!(parse_compact_date("2024-03-15"), None);
        assert_eq!(parse_compact_date(""), None);
        assert_eq!(parse_compact_date("20240229"), NaiveDate::from_ymd_opt(2024, 2, 29));

        let mut record = nested_record();
        record["insert_date"] = json!("not a date");
        assert_eq!(normalize(&record).unwrap().insert_date, None);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let paper = normalize(&json!({ "article_number": 5, "title": "Bare" })).unwrap();
        assert_eq!(paper.abstract_text, "");
        assert_eq!(paper.download_count, 0);
        assert_eq!(paper.publication_year, None);
        assert!(paper.authors.is_empty());
        assert_eq!(paper.prompt, "title: Bare - abstract:  - index_terms: ");
    }

    #[test]
    fn test_missing_identifier_or_title_is_malformed() {
        let err = normalize(&json!({ "title": "No id" })).unwrap_err();
        assert!(matches!(err, IngestionError::MalformedRecord { .. }));

        let err = normalize(&json!({ "article_number": "1" })).unwrap_err();
        assert!(matches!(err, IngestionError::MalformedRecord { ref record, .. } if record == "1"));
    }

    #[test]
    fn test_malformed_record_does_not_abort_page() {
        let mut broken = nested_record();
        broken["article_number"] = json!("2");
        broken["authors"] = json!({ "authors": "[{not json" });

        let mut third = nested_record();
        third["article_number"] = json!("3");

        let page = normalize_page(vec![nested_record(), broken, third]);
        assert_eq!(page.papers.len(), 2);
        assert_eq!(page.rejected.len(), 1);
        assert_eq!(
            page.papers.iter().map(|p| p.external_id.as_str()).collect::<Vec<_>>(),
            vec!["10500001", "3"]
        );
    }
}
