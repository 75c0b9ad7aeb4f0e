//! HR assistant: candidate search over a per-owner directory

use super::DomainProfile;
use crate::error::EngineError;
use crate::prompt::Persona;
use crate::tools::{
    ensure_object, optional_limit, optional_number, optional_str, require_number, require_str,
    Tool, ToolContext, ToolRegistry,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const PERSONA: &str = "Help recruiters find and shortlist candidates. \
Search the directory before answering questions about who is available, and summarize matches by name, \
experience and key skills. Never invent candidates.";

const KNOWLEDGE: &str = "Seniority bands by years of experience: junior 0-2, mid 3-5, senior 6-9, principal 10+.\n\
Skill names are matched case-insensitively.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    pub skills: Vec<String>,
    pub years_experience: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Candidate {
    fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s.eq_ignore_ascii_case(skill))
    }
}

#[derive(Debug, Default, Clone)]
pub struct CandidateQuery {
    pub skills: Vec<String>,
    pub min_experience: f64,
    pub location: Option<String>,
    pub limit: usize,
}

/// Candidate records partitioned by owner id
#[derive(Default)]
pub struct CandidatePool {
    candidates: RwLock<HashMap<String, Vec<Candidate>>>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, owner_id: &str, candidate: Candidate) {
        let mut candidates = self.candidates.write().await;
        candidates.entry(owner_id.to_string()).or_default().push(candidate);
    }

    /// Matches every requested skill; most experienced first
    pub async fn search(&self, owner_id: &str, query: &CandidateQuery) -> Vec<Candidate> {
        let candidates = self.candidates.read().await;
        let location = query.location.as_deref().map(str::to_lowercase);

        let mut matches: Vec<Candidate> = candidates
            .get(owner_id)
            .map(|list| {
                list.iter()
                    .filter(|c| query.skills.iter().all(|s| c.has_skill(s)))
                    .filter(|c| c.years_experience >= query.min_experience)
                    .filter(|c| match (&location, &c.location) {
                        (None, _) => true,
                        (Some(wanted), Some(actual)) => actual.to_lowercase().contains(wanted),
                        (Some(_), None) => false,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        matches.sort_by(|a, b| b.years_experience.total_cmp(&a.years_experience));
        matches.truncate(query.limit);
        matches
    }
}

pub fn profile() -> DomainProfile {
    let pool = Arc::new(CandidatePool::new());
    let registry = ToolRegistry::new()
        .with(Arc::new(SearchCandidatesTool { pool: pool.clone() }))
        .with(Arc::new(AddCandidateTool { pool }));

    DomainProfile {
        kind: "hr".to_string(),
        persona: Persona::new("Harper, a recruiting assistant", PERSONA),
        domain_knowledge: KNOWLEDGE.to_string(),
        registry,
        collection: Some("hr_candidates".to_string()),
    }
}

/// Accepts `["rust", "sql"]` or `"rust, sql"`
fn skill_list(args: &Value, key: &str) -> Result<Vec<String>> {
    let skills: Vec<String> = match args.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    EngineError::InvalidToolInput(format!("'{}' must contain only strings", key))
                })
            })
            .collect::<Result<_>>()?,
        Some(_) => {
            return Err(EngineError::InvalidToolInput(format!(
                "'{}' must be a list of strings",
                key
            )))
        }
    };

    Ok(skills.into_iter().filter(|s| !s.is_empty()).collect())
}

pub struct SearchCandidatesTool {
    pool: Arc<CandidatePool>,
}

#[async_trait::async_trait]
impl Tool for SearchCandidatesTool {
    fn name(&self) -> &'static str {
        "searchCandidates"
    }

    fn description(&self) -> &'static str {
        "Search candidates by skills, minimum years of experience and location"
    }

    fn usage(&self) -> &'static str {
        r#"{"skills": ["rust", "postgres"], "minExperience": 3, "location": "Berlin", "limit": 5}"#
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<Value> {
        ensure_object(args)?;
        let query = CandidateQuery {
            skills: skill_list(args, "skills")?,
            min_experience: optional_number(args, "minExperience")?.unwrap_or(0.0),
            location: optional_str(args, "location").map(str::to_string),
            limit: optional_limit(args, 5, 25)?,
        };

        let candidates = self.pool.search(&ctx.owner_id, &query).await;
        Ok(json!({
            "count": candidates.len(),
            "candidates": candidates,
        }))
    }
}

pub struct AddCandidateTool {
    pool: Arc<CandidatePool>,
}

#[async_trait::async_trait]
impl Tool for AddCandidateTool {
    fn name(&self) -> &'static str {
        "addCandidate"
    }

    fn description(&self) -> &'static str {
        "Add a candidate profile to the directory"
    }

    fn usage(&self) -> &'static str {
        r#"{"name": "Ada Lovelace", "skills": ["rust"], "yearsExperience": 7, "location": "London"}"#
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<Value> {
        ensure_object(args)?;
        let name = require_str(args, "name")?.to_string();
        let skills = skill_list(args, "skills")?;
        if skills.is_empty() {
            return Err(EngineError::InvalidToolInput(
                "'skills' must list at least one skill".to_string(),
            ));
        }
        let years_experience = require_number(args, "yearsExperience")?;
        if !years_experience.is_finite() || years_experience < 0.0 {
            return Err(EngineError::InvalidToolInput(
                "'yearsExperience' must be zero or more".to_string(),
            ));
        }

        let candidate = Candidate {
            id: Uuid::new_v4(),
            name,
            skills,
            years_experience,
            location: optional_str(args, "location").map(str::to_string),
        };
        let reply = format!("Added candidate {} ({})", candidate.name, candidate.id);
        self.pool.add(&ctx.owner_id, candidate).await;

        Ok(json!(reply))
    }
}
