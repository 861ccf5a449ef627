//! Job payload wire contracts.
//!
//! These shapes travel between the producing and the consuming deployment
//! through the broker. Field names are part of the contract: renaming one is a
//! breaking change across process boundaries.
//!
//! | kind | wire shape |
//! |---|---|
//! | content insert | `{ "insertContent": {...} }` |
//! | article publish | `{ "pushArticle": { "articleId", "website": { "id", "backendUrl" }, "categoryId" } }` |
//! | article removal | `{ "articleId", "website": { "id", "backendUrl" } }` |
//! | ads push | `{ "adsId", "website": { "id", "backendUrl" } }` |
//! | notification | `{ "emailData"? }` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pushdeck_core::{AdsId, ArticleId, CategoryId, Content, WebsiteId};

use super::types::JobKind;

/// Destination snapshot taken at enqueue time. Never re-resolved by workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteTarget {
    pub id: WebsiteId,
    pub backend_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentInsertJob {
    pub insert_content: Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushArticle {
    pub article_id: ArticleId,
    pub website: WebsiteTarget,
    pub category_id: CategoryId,
}

/// Article job, publish or removal.
///
/// On the wire exactly one of `pushArticle` / `articleId` is present; decoding
/// a payload with both or neither fails. A removal also carries the snapshot
/// of the one website it was authorized for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ArticlePushWire", into = "ArticlePushWire")]
pub enum ArticlePushJob {
    Publish(PushArticle),
    Remove {
        article_id: ArticleId,
        website: WebsiteTarget,
    },
}

impl ArticlePushJob {
    pub fn article_id(&self) -> &ArticleId {
        match self {
            ArticlePushJob::Publish(push) => &push.article_id,
            ArticlePushJob::Remove { article_id, .. } => article_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticlePushWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    push_article: Option<PushArticle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    article_id: Option<ArticleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    website: Option<WebsiteTarget>,
}

impl TryFrom<ArticlePushWire> for ArticlePushJob {
    type Error = String;

    fn try_from(wire: ArticlePushWire) -> Result<Self, Self::Error> {
        match (wire.push_article, wire.article_id) {
            (Some(_), None) if wire.website.is_some() => {
                Err("website belongs inside pushArticle for a publish".to_string())
            }
            (Some(push), None) => Ok(ArticlePushJob::Publish(push)),
            (None, Some(article_id)) => match wire.website {
                Some(website) => Ok(ArticlePushJob::Remove {
                    article_id,
                    website,
                }),
                None => Err("article removal must carry its website".to_string()),
            },
            (Some(_), Some(_)) => {
                Err("article job must populate pushArticle or articleId, not both".to_string())
            }
            (None, None) => {
                Err("article job must populate either pushArticle or articleId".to_string())
            }
        }
    }
}

impl From<ArticlePushJob> for ArticlePushWire {
    fn from(job: ArticlePushJob) -> Self {
        match job {
            ArticlePushJob::Publish(push) => ArticlePushWire {
                push_article: Some(push),
                article_id: None,
                website: None,
            },
            ArticlePushJob::Remove {
                article_id,
                website,
            } => ArticlePushWire {
                push_article: None,
                article_id: Some(article_id),
                website: Some(website),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdsPushJob {
    pub ads_id: AdsId,
    pub website: WebsiteTarget,
}

/// Message handed to the mail relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailData {
    pub to: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_data: Option<EmailData>,
}

/// A typed payload, one variant per job kind.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    ContentInsert(ContentInsertJob),
    ArticlePush(ArticlePushJob),
    AdsPush(AdsPushJob),
    Notification(NotificationJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::ContentInsert(_) => JobKind::ContentInsert,
            JobPayload::ArticlePush(_) => JobKind::ArticlePush,
            JobPayload::AdsPush(_) => JobKind::AdsPush,
            JobPayload::Notification(_) => JobKind::Notification,
        }
    }

    /// Shape checks the worker relies on and never repeats.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            JobPayload::ContentInsert(job) => {
                if job.insert_content.id.is_blank() {
                    return Err("insertContent.id must not be empty".to_string());
                }
            }
            JobPayload::ArticlePush(ArticlePushJob::Publish(push)) => {
                non_blank("pushArticle.articleId", push.article_id.as_str())?;
                non_blank("pushArticle.categoryId", push.category_id.as_str())?;
                validate_target("pushArticle.website", &push.website)?;
            }
            JobPayload::ArticlePush(ArticlePushJob::Remove {
                article_id,
                website,
            }) => {
                non_blank("articleId", article_id.as_str())?;
                validate_target("website", website)?;
            }
            JobPayload::AdsPush(job) => {
                non_blank("adsId", job.ads_id.as_str())?;
                validate_target("website", &job.website)?;
            }
            JobPayload::Notification(job) => {
                if let Some(email) = &job.email_data {
                    non_blank("emailData.to", &email.to)?;
                    if email.html.is_none() && email.text.is_none() {
                        return Err("emailData needs an html or text body".to_string());
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            JobPayload::ContentInsert(job) => serde_json::to_value(job),
            JobPayload::ArticlePush(job) => serde_json::to_value(job),
            JobPayload::AdsPush(job) => serde_json::to_value(job),
            JobPayload::Notification(job) => serde_json::to_value(job),
        }
    }

    /// Decode a stored payload; the job kind picks the shape.
    pub fn from_value(kind: JobKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            JobKind::ContentInsert => JobPayload::ContentInsert(serde_json::from_value(value)?),
            JobKind::ArticlePush => JobPayload::ArticlePush(serde_json::from_value(value)?),
            JobKind::AdsPush => JobPayload::AdsPush(serde_json::from_value(value)?),
            JobKind::Notification => JobPayload::Notification(serde_json::from_value(value)?),
        })
    }
}

fn non_blank(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

fn validate_target(field: &str, target: &WebsiteTarget) -> Result<(), String> {
    non_blank(&format!("{field}.id"), target.id.as_str())?;
    let url = target.backend_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!(
            "{field}.backendUrl must be an absolute http(s) URL, got '{url}'"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> WebsiteTarget {
        WebsiteTarget {
            id: WebsiteId::new("W1"),
            backend_url: "https://site.example".to_string(),
        }
    }

    #[test]
    fn publish_serializes_under_push_article() {
        let job = ArticlePushJob::Publish(PushArticle {
            article_id: ArticleId::new("A1"),
            website: target(),
            category_id: CategoryId::new("C1"),
        });

        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            json!({
                "pushArticle": {
                    "articleId": "A1",
                    "website": { "id": "W1", "backendUrl": "https://site.example" },
                    "categoryId": "C1"
                }
            })
        );
    }

    #[test]
    fn article_id_without_push_article_decodes_as_removal() {
        let value = json!({
            "articleId": "A1",
            "website": { "id": "W1", "backendUrl": "https://site.example" }
        });
        let job: ArticlePushJob = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(
            job,
            ArticlePushJob::Remove {
                article_id: ArticleId::new("A1"),
                website: target(),
            }
        );
        assert_eq!(serde_json::to_value(&job).unwrap(), value);
    }

    #[test]
    fn removal_without_destination_is_rejected() {
        let err = serde_json::from_value::<ArticlePushJob>(json!({ "articleId": "A1" }))
            .unwrap_err();
        assert!(err.to_string().contains("website"));
    }

    #[test]
    fn both_or_neither_branch_is_rejected() {
        let both = json!({
            "articleId": "A1",
            "pushArticle": {
                "articleId": "A1",
                "website": { "id": "W1", "backendUrl": "https://site.example" },
                "categoryId": "C1"
            }
        });
        assert!(serde_json::from_value::<ArticlePushJob>(both).is_err());
        assert!(serde_json::from_value::<ArticlePushJob>(json!({})).is_err());
    }

    #[test]
    fn absent_email_data_is_valid_and_omitted() {
        let payload = JobPayload::Notification(NotificationJob::default());
        assert!(payload.validate().is_ok());
        assert_eq!(payload.to_value().unwrap(), json!({}));
    }

    #[test]
    fn validate_rejects_relative_backend_url() {
        let payload = JobPayload::AdsPush(AdsPushJob {
            ads_id: AdsId::new("AD1"),
            website: WebsiteTarget {
                id: WebsiteId::new("W1"),
                backend_url: "site.example".to_string(),
            },
        });
        let err = payload.validate().unwrap_err();
        assert!(err.contains("backendUrl"));
    }

    #[test]
    fn from_value_uses_kind_to_pick_shape() {
        let value = json!({ "adsId": "AD1", "website": { "id": "W1", "backendUrl": "https://x.example" } });
        let payload = JobPayload::from_value(JobKind::AdsPush, value.clone()).unwrap();
        assert_eq!(payload.kind(), JobKind::AdsPush);
        assert_eq!(payload.to_value().unwrap(), value);
        assert!(JobPayload::from_value(JobKind::ContentInsert, value).is_err());
    }
}
