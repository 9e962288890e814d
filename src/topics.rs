//! Topic profile loading and validation.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid topic config: {0}")]
    Invalid(String),
}

/// A topical vertical the pipeline curates news for. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub author: String,
    pub queries: Vec<String>,
    pub categories: Vec<String>,
    pub min_score: f64,
    pub scoring_guidance: String,
    pub writing_guidance: String,
}

#[derive(Debug, Deserialize)]
struct TopicsFile {
    #[serde(default)]
    topics: Vec<RawTopic>,
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    min_score: Option<f64>,
    #[serde(default)]
    scoring_guidance: String,
    #[serde(default)]
    writing_guidance: String,
}

fn normalize(raw: RawTopic, global_min_score: f64) -> Result<Topic, TopicError> {
    let id = raw.id.trim().to_string();
    if id.is_empty() {
        return Err(TopicError::Invalid("topic missing 'id'".into()));
    }
    let queries: Vec<String> = raw
        .queries
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if queries.is_empty() {
        return Err(TopicError::Invalid(format!("topic '{id}' has no queries")));
    }
    let name = {
        let n = raw.name.trim();
        if n.is_empty() {
            id.clone()
        } else {
            n.to_string()
        }
    };
    let categories = raw
        .categories
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    let min_score = raw.min_score.unwrap_or(global_min_score);
    if !(0.0..=100.0).contains(&min_score) {
        return Err(TopicError::Invalid(format!(
            "topic '{id}' min_score must be within 0-100"
        )));
    }
    Ok(Topic {
        id,
        name,
        author: raw.author.trim().to_string(),
        queries,
        categories,
        min_score,
        scoring_guidance: raw.scoring_guidance.trim().to_string(),
        writing_guidance: raw.writing_guidance.trim().to_string(),
    })
}

fn default_topic(global_min_score: f64) -> Topic {
    Topic {
        id: "montessori_core".into(),
        name: "Montessori Global".into(),
        author: String::new(),
        queries: vec![
            "Montessori".into(),
            "Montessori education".into(),
            "método Montessori".into(),
            "Montessori news".into(),
        ],
        categories: vec!["Educación Montessori".into()],
        min_score: global_min_score,
        scoring_guidance:
            "Prioriza noticia verificable y aplicabilidad educativa en contexto internacional."
                .into(),
        writing_guidance:
            "Mantén enfoque práctico para familias y educadores de distintos países.".into(),
    }
}

/// Load topic profiles from a YAML file. A missing or empty file yields the
/// built-in default topic. `only_ids` filters the loaded set when non-empty.
pub fn load_topics(
    path: &Path,
    global_min_score: f64,
    only_ids: &[String],
) -> Result<Vec<Topic>, TopicError> {
    if !path.exists() {
        return Ok(vec![default_topic(global_min_score)]);
    }

    let content = fs::read_to_string(path)?;
    let file: TopicsFile = serde_yaml::from_str(&content)?;
    if file.topics.is_empty() {
        return Ok(vec![default_topic(global_min_score)]);
    }

    let mut topics = Vec::with_capacity(file.topics.len());
    for raw in file.topics {
        topics.push(normalize(raw, global_min_score)?);
    }

    let mut seen = std::collections::HashSet::new();
    for topic in &topics {
        if !seen.insert(topic.id.clone()) {
            return Err(TopicError::Invalid(format!(
                "duplicate topic id: {}",
                topic.id
            )));
        }
    }

    if !only_ids.is_empty() {
        let allowed: std::collections::HashSet<&str> = only_ids
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .collect();
        topics.retain(|t| allowed.contains(t.id.as_str()));
    }
    if topics.is_empty() {
        return Ok(vec![default_topic(global_min_score)]);
    }
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"topics:
  - id: t1
    name: "Topic One"
    author: "Ana"
    queries: ["alpha news", "alpha update"]
    categories: ["Alpha"]
    min_score: 55
    scoring_guidance: "recent facts first"
  - id: t2
    queries: ["beta"]
"#;

    fn write_topics(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let td = tempdir().unwrap();
        let p = td.path().join("topics.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (td, p)
    }

    #[test]
    fn loads_and_normalizes() {
        let (_td, p) = write_topics(SAMPLE);
        let topics = load_topics(&p, 60.0, &[]).unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].min_score, 55.0);
        assert_eq!(topics[1].name, "t2");
        assert_eq!(topics[1].min_score, 60.0);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let td = tempdir().unwrap();
        let topics = load_topics(&td.path().join("absent.yaml"), 62.5, &[]).unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].id, "montessori_core");
        assert_eq!(topics[0].min_score, 62.5);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let (_td, p) = write_topics(
            "topics:\n  - id: t1\n    queries: [a]\n  - id: t1\n    queries: [b]\n",
        );
        let err = load_topics(&p, 60.0, &[]).unwrap_err();
        assert!(matches!(err, TopicError::Invalid(_)));
    }

    #[test]
    fn empty_queries_rejected() {
        let (_td, p) = write_topics("topics:\n  - id: t1\n    queries: []\n");
        assert!(load_topics(&p, 60.0, &[]).is_err());
    }

    #[test]
    fn only_ids_filter() {
        let (_td, p) = write_topics(SAMPLE);
        let topics = load_topics(&p, 60.0, &["t2".to_string()]).unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].id, "t2");
    }
}
