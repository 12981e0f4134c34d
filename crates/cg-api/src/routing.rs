//! Request category → (queue, priority) mapping
//!
//! | edu_type | discriminator          | queue                                   | priority |
//! |----------|------------------------|-----------------------------------------|----------|
//! | 1        |                        | default                                 | high     |
//! | 2,3,5,6  |                        | default                                 | medium   |
//! | 4        |                        | default                                 | low      |
//! | 7        | request_type 1,2       | `sokind_conversation_generate_response` | medium   |
//! | 7        | other                  | `sokind_conversation`                   | medium   |
//! | 8        | request_type 1,2       | `sokind_demo_generate_response`         | medium   |
//! | 8        | request_type 3,4       | `sokind_demo_analyze_response`          | medium   |
//! | 8        | other                  | default                                 | medium   |
//! | 9        |                        | `periodic_report`                       | medium   |
//! | 10       | generation_type AUGMENTATION | `V3_PERSONA_GENERATION`           | medium   |
//! | 10       | generation_type QUESTION     | `V3_RESPONSE_GENERATION`          | medium   |
//! | 10       | generation_type REPORT       | `V3_CONVERSATION_ANALYSIS_REPORT` | medium   |

use cg_config::{PriorityLevels, RoutingConfig};
use serde_json::Value;
use thiserror::Error;

pub const CONVERSATION_GENERATE_QUEUE: &str = "sokind_conversation_generate_response";
pub const CONVERSATION_QUEUE: &str = "sokind_conversation";
pub const DEMO_GENERATE_QUEUE: &str = "sokind_demo_generate_response";
pub const DEMO_ANALYZE_QUEUE: &str = "sokind_demo_analyze_response";
pub const PERIODIC_REPORT_QUEUE: &str = "periodic_report";
pub const PERSONA_GENERATION_QUEUE: &str = "V3_PERSONA_GENERATION";
pub const RESPONSE_GENERATION_QUEUE: &str = "V3_RESPONSE_GENERATION";
pub const ANALYSIS_REPORT_QUEUE: &str = "V3_CONVERSATION_ANALYSIS_REPORT";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("{0} is missing")]
    Missing(&'static str),

    #[error("{field} is invalid: {value}")]
    Invalid { field: &'static str, value: String },

    #[error("unsupported edu_type: {0}")]
    UnsupportedEduType(i64),

    #[error("unsupported generation_type: {0}")]
    UnsupportedGenerationType(String),
}

/// Kinds of analysis request the gateway accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Recorded training evaluations, edu_type 1 to 6
    Evaluation(u8),
    /// edu_type 7, `request_type` picks the queue
    Conversation { request_type: Option<i64> },
    /// edu_type 8
    Demo { request_type: Option<i64> },
    /// edu_type 9
    PeriodicReport,
    /// edu_type 10 AUGMENTATION
    PersonaGeneration,
    /// edu_type 10 QUESTION
    ResponseGeneration,
    /// edu_type 10 REPORT
    AnalysisReport,
}

impl Category {
    pub fn from_request(body: &Value) -> Result<Self, RoutingError> {
        let object = body.as_object().ok_or(RoutingError::NotAnObject)?;
        let edu_type = match object.get("edu_type") {
            None | Some(Value::Null) => return Err(RoutingError::Missing("edu_type")),
            Some(value) => integer_field("edu_type", value)?,
        };
        let request_type = match object.get("request_type") {
            None | Some(Value::Null) => None,
            Some(value) => Some(integer_field("request_type", value)?),
        };

        match edu_type {
            1..=6 => Ok(Category::Evaluation(edu_type as u8)),
            7 => Ok(Category::Conversation { request_type }),
            8 => Ok(Category::Demo { request_type }),
            9 => Ok(Category::PeriodicReport),
            10 => {
                let generation_type = object
                    .get("generation_type")
                    .and_then(Value::as_str)
                    .ok_or(RoutingError::Missing("generation_type"))?;
                match generation_type {
                    "AUGMENTATION" => Ok(Category::PersonaGeneration),
                    "QUESTION" => Ok(Category::ResponseGeneration),
                    "REPORT" => Ok(Category::AnalysisReport),
                    other => Err(RoutingError::UnsupportedGenerationType(other.to_string())),
                }
            }
            other => Err(RoutingError::UnsupportedEduType(other)),
        }
    }

    /// v3 generation requests carry the caller's address
    pub fn includes_client_ip(&self) -> bool {
        matches!(
            self,
            Category::PersonaGeneration | Category::ResponseGeneration | Category::AnalysisReport
        )
    }
}

/// Integers may arrive as JSON numbers or numeric strings
fn integer_field(field: &'static str, value: &Value) -> Result<i64, RoutingError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| RoutingError::Invalid {
        field,
        value: value.to_string(),
    })
}

/// Where a request ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub queue: String,
    pub priority: u8,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routing: RoutingConfig,
    priorities: PriorityLevels,
}

impl RouteTable {
    pub fn new(routing: RoutingConfig, priorities: PriorityLevels) -> Self {
        Self { routing, priorities }
    }

    pub fn route(&self, category: Category) -> Route {
        let default_queue = self.routing.default_queue.as_str();
        let medium = self.priorities.medium;

        let (queue, priority) = match category {
            Category::Evaluation(1) => (default_queue, self.priorities.high),
            Category::Evaluation(4) => (default_queue, self.priorities.low),
            Category::Evaluation(_) => (default_queue, medium),
            Category::Conversation { request_type: Some(1 | 2) } => (CONVERSATION_GENERATE_QUEUE, medium),
            Category::Conversation { .. } => (CONVERSATION_QUEUE, medium),
            Category::Demo { request_type: Some(1 | 2) } => (DEMO_GENERATE_QUEUE, medium),
            Category::Demo { request_type: Some(3 | 4) } => (DEMO_ANALYZE_QUEUE, medium),
            Category::Demo { .. } => (default_queue, medium),
            Category::PeriodicReport => (PERIODIC_REPORT_QUEUE, medium),
            Category::PersonaGeneration => (PERSONA_GENERATION_QUEUE, medium),
            Category::ResponseGeneration => (RESPONSE_GENERATION_QUEUE, medium),
            Category::AnalysisReport => (ANALYSIS_REPORT_QUEUE, medium),
        };

        Route {
            queue: queue.to_string(),
            priority,
        }
    }

    pub fn resolve(&self, body: &Value) -> Result<(Category, Route), RoutingError> {
        let category = Category::from_request(body)?;
        Ok((category, self.route(category)))
    }
}
