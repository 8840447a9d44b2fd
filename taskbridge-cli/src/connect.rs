//! Live HTTP adapters for the two client traits.
//!
//! Deliberately thin: JSON in, JSON out, one call per trait method, with the
//! status-code classification the dispatcher's retry logic depends on
//! (429/5xx and transport errors are transient, other 4xx are rejections).

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use taskbridge_core::config::{BoardConfig, ChatConfig};
use taskbridge_core::types::{AssigneeRole, BoardRecordId, ChatTaskId, TaskSnapshot, TaskStatus};
use taskbridge_sync::{
    BoardClient, BoardRow, ChatClient, ChatTaskRecord, ClientError, WriteReceipt,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(HTTP_TIMEOUT)
        .build()
}

fn classify(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = format!("HTTP {code}: {body}");
            if code == 429 || code >= 500 {
                ClientError::Transient(message)
            } else {
                ClientError::Rejected(message)
            }
        }
        ureq::Error::Transport(transport) => ClientError::Transient(transport.to_string()),
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(response: ureq::Response) -> Result<T, ClientError> {
    response
        .into_json::<T>()
        .map_err(|err| ClientError::Rejected(format!("malformed response body: {err}")))
}

fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Chat platform adapter. Credentials travel as headers on every request.
pub struct HttpChatClient {
    agent: ureq::Agent,
    base: String,
    app_key: String,
    app_secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatWriteResponse {
    task_id: String,
    modified_time: i64,
}

impl HttpChatClient {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            agent: agent(),
            base: config.api_base.trim_end_matches('/').to_string(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}{}", self.base, path))
            .set("x-app-key", &self.app_key)
            .set("x-app-secret", &self.app_secret)
    }

    fn task_body(content: &TaskSnapshot) -> serde_json::Value {
        json!({
            "subject": content.title,
            "done": content.status == TaskStatus::Done,
            "dueTime": content.due_at.map(|d| d.timestamp_millis()),
        })
    }
}

impl ChatClient for HttpChatClient {
    fn create_task(&self, content: &TaskSnapshot) -> Result<WriteReceipt, ClientError> {
        let response = self
            .request("POST", "/v1/tasks")
            .send_json(Self::task_body(content))
            .map_err(classify)?;
        let body: ChatWriteResponse = parse_json(response)?;
        Ok(WriteReceipt {
            external_id: body.task_id,
            updated_at: ms_to_utc(body.modified_time),
        })
    }

    fn update_task(
        &self,
        id: &ChatTaskId,
        content: &TaskSnapshot,
    ) -> Result<WriteReceipt, ClientError> {
        let response = self
            .request("PUT", &format!("/v1/tasks/{id}"))
            .send_json(Self::task_body(content))
            .map_err(classify)?;
        let body: ChatWriteResponse = parse_json(response)?;
        Ok(WriteReceipt {
            external_id: body.task_id,
            updated_at: ms_to_utc(body.modified_time),
        })
    }

    fn delete_task(&self, id: &ChatTaskId) -> Result<(), ClientError> {
        self.request("DELETE", &format!("/v1/tasks/{id}"))
            .call()
            .map_err(classify)?;
        Ok(())
    }

    fn get_task(&self, id: &ChatTaskId) -> Result<Option<ChatTaskRecord>, ClientError> {
        match self.request("GET", &format!("/v1/tasks/{id}")).call() {
            Ok(response) => Ok(Some(parse_json(response)?)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(classify(err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// Board workspace adapter against the two configured collections.
pub struct HttpBoardClient {
    agent: ureq::Agent,
    base: String,
    token: String,
    assigned_to_me: String,
    assigned_by_me: String,
}

#[derive(Debug, Deserialize)]
struct BoardWriteResponse {
    record_id: String,
    last_edited: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BoardQueryResponse {
    #[serde(default)]
    results: Vec<BoardRow>,
}

impl HttpBoardClient {
    pub fn new(config: &BoardConfig) -> Self {
        Self {
            agent: agent(),
            base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            assigned_to_me: config.assigned_to_me_collection.clone(),
            assigned_by_me: config.assigned_by_me_collection.clone(),
        }
    }

    fn collection(&self, role: AssigneeRole) -> &str {
        match role {
            AssigneeRole::AssignedToMe => &self.assigned_to_me,
            AssigneeRole::AssignedByMe => &self.assigned_by_me,
        }
    }

    fn role_of(&self, collection: &str) -> Option<AssigneeRole> {
        if collection == self.assigned_to_me {
            Some(AssigneeRole::AssignedToMe)
        } else if collection == self.assigned_by_me {
            Some(AssigneeRole::AssignedByMe)
        } else {
            None
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}{}", self.base, path))
            .set("Authorization", &format!("Bearer {}", self.token))
    }

    fn record_body(content: &TaskSnapshot) -> serde_json::Value {
        json!({
            "title": content.title,
            "status": if content.status == TaskStatus::Done { "Done" } else { "Open" },
            "due_at": content.due_at,
            "chat_task_id": content.chat_id.as_ref().map(|id| id.0.clone()),
        })
    }

    fn query(
        &self,
        collection: &str,
        filter: serde_json::Value,
    ) -> Result<Vec<BoardRow>, ClientError> {
        let response = self
            .request("POST", &format!("/collections/{collection}/query"))
            .send_json(json!({ "filter": filter }))
            .map_err(classify)?;
        let body: BoardQueryResponse = parse_json(response)?;
        let role = self.role_of(collection);
        Ok(body
            .results
            .into_iter()
            .map(|mut row| {
                if row.role.is_none() {
                    row.role = role;
                }
                row
            })
            .collect())
    }
}

impl BoardClient for HttpBoardClient {
    fn create_record(
        &self,
        role: AssigneeRole,
        content: &TaskSnapshot,
    ) -> Result<WriteReceipt, ClientError> {
        let collection = self.collection(role);
        let response = self
            .request("POST", &format!("/collections/{collection}/records"))
            .send_json(Self::record_body(content))
            .map_err(classify)?;
        let body: BoardWriteResponse = parse_json(response)?;
        Ok(WriteReceipt {
            external_id: body.record_id,
            updated_at: body.last_edited,
        })
    }

    fn update_record(
        &self,
        id: &BoardRecordId,
        content: &TaskSnapshot,
    ) -> Result<WriteReceipt, ClientError> {
        let response = self
            .request("PATCH", &format!("/records/{id}"))
            .send_json(Self::record_body(content))
            .map_err(classify)?;
        let body: BoardWriteResponse = parse_json(response)?;
        Ok(WriteReceipt {
            external_id: body.record_id,
            updated_at: body.last_edited,
        })
    }

    fn delete_record(&self, id: &BoardRecordId) -> Result<(), ClientError> {
        self.request("DELETE", &format!("/records/{id}"))
            .call()
            .map_err(classify)?;
        Ok(())
    }

    fn list_records(&self, role: AssigneeRole) -> Result<Vec<BoardRow>, ClientError> {
        self.query(self.collection(role), json!({}))
    }

    fn find_by_chat_id(&self, chat_id: &ChatTaskId) -> Result<Option<BoardRow>, ClientError> {
        for role in AssigneeRole::all() {
            let mut rows = self.query(
                self.collection(role),
                json!({ "chat_task_id": chat_id.0 }),
            )?;
            if let Some(row) = rows.pop() {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}
