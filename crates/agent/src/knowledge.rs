use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::{parse_arguments, schema_of, Tool, ToolError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub title: String,
    pub text: String,
}

impl Passage {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self { title: title.into(), text: text.into() }
    }
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Passage>, ToolError>;
}

/// In-process passage store ranked by query-term overlap.
#[derive(Clone, Debug, Default)]
pub struct StaticKnowledgeBase {
    passages: Vec<Passage>,
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

impl StaticKnowledgeBase {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self { passages }
    }

    pub fn clinic() -> Self {
        Self::new(vec![
            Passage::new(
                "Opening hours",
                "The hospital outpatient clinics are open every day from 08:00 to 22:00. \
                 Appointments can be booked for any time within opening hours.",
            ),
            Passage::new(
                "Emergency department",
                "The emergency department is open 24 hours a day, 7 days a week, and does not \
                 require an appointment. Call the emergency line for urgent cases.",
            ),
            Passage::new(
                "Departments and services",
                "Services include cardiology, dermatology, pediatrics, orthopedics and general \
                 practice, plus laboratory tests, radiology and an in-house pharmacy.",
            ),
            Passage::new(
                "Location and parking",
                "The hospital is located on the main street next to the central park. Free \
                 visitor parking is available in the underground garage.",
            ),
            Passage::new(
                "Visiting hours",
                "Visiting hours for inpatients are from 10:00 to 20:00. Two visitors are \
                 allowed per patient at a time.",
            ),
            Passage::new(
                "Insurance and payment",
                "Most major insurance plans are accepted. Patients without insurance can pay \
                 by card or cash at the reception desk.",
            ),
        ])
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Passage>, ToolError> {
        let wanted = terms(query);
        let mut ranked = self
            .passages
            .iter()
            .enumerate()
            .filter_map(|(index, passage)| {
                let haystack = terms(&format!("{} {}", passage.title, passage.text));
                let score = wanted.intersection(&haystack).count();
                (score > 0).then_some((score, index))
            })
            .collect::<Vec<_>>();
        // highest score first; ties keep passage order
        ranked.sort_by(|left, right| right.0.cmp(&left.0).then(left.1.cmp(&right.1)));

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(_, index)| self.passages[index].clone())
            .collect())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RetrieveHospitalInformationArgs {
    /// What the caller wants to know about the hospital.
    pub query: String,
}

pub struct RetrieveHospitalInformationTool {
    knowledge: Arc<dyn KnowledgeBase>,
    limit: usize,
}

impl RetrieveHospitalInformationTool {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self { knowledge, limit: 3 }
    }
}

#[async_trait]
impl Tool for RetrieveHospitalInformationTool {
    fn name(&self) -> &'static str {
        "retrieve_hospital_information"
    }

    fn description(&self) -> &'static str {
        "Search and return information about hospital and services."
    }

    fn argument_schema(&self) -> Value {
        schema_of::<RetrieveHospitalInformationArgs>()
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: RetrieveHospitalInformationArgs = parse_arguments(self.name(), arguments)?;
        let passages = self.knowledge.search(&args.query, self.limit).await?;
        if passages.is_empty() {
            return Ok(json!({
                "success": false,
                "message": "No hospital information matched the question.",
            }));
        }
        Ok(json!({ "success": true, "passages": passages }))
    }
}
