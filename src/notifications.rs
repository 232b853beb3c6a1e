//! Outgoing mail: content alerts and account messages.
//!
//! Alerts are fanned out as one `send-email` job per recipient. Account
//! messages are built here and either sent inline (registration) or queued.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::accounts::allowed_families;
use crate::auth::jwt::JwtService;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::enqueue_email;
use crate::mail::Email;
use crate::models::User;
use crate::schema::users;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Info,
    FamInfo,
    Recipe,
    Discussion,
}

impl AlertCategory {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(AlertCategory::Info),
            "faminfo" => Some(AlertCategory::FamInfo),
            "recipe" => Some(AlertCategory::Recipe),
            "discussion" => Some(AlertCategory::Discussion),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Info => "info",
            AlertCategory::FamInfo => "faminfo",
            AlertCategory::Recipe => "recipe",
            AlertCategory::Discussion => "discussion",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            AlertCategory::Info => "Neue Info erstellt",
            AlertCategory::FamInfo => "Neue Familien-Info erstellt",
            AlertCategory::Recipe => "Neues Rezept erstellt",
            AlertCategory::Discussion => "Neuer Diskussionsbeitrag",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            AlertCategory::Info => "eine neue Info",
            AlertCategory::FamInfo => "eine neue Familien-Info",
            AlertCategory::Recipe => "ein neues Rezept",
            AlertCategory::Discussion => "ein neuer Diskussionsbeitrag",
        }
    }
}

/// A newly created piece of content that subscribers may want to hear about.
#[derive(Debug, Clone)]
pub struct ContentEvent {
    pub category: AlertCategory,
    pub title: String,
    pub author_id: Option<Uuid>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    /// Frontend path of the new content, e.g. `/infos/<id>`.
    pub path: String,
}

fn subscribers(conn: &mut PgConnection, category: AlertCategory) -> QueryResult<Vec<User>> {
    let query = users::table
        .filter(users::is_active.eq(true))
        .select(User::as_select())
        .into_boxed();
    let query = match category {
        AlertCategory::Info => query.filter(users::alert_info.eq(true)),
        AlertCategory::FamInfo => query.filter(users::alert_faminfo.eq(true)),
        AlertCategory::Recipe => query.filter(users::alert_recipe.eq(true)),
        AlertCategory::Discussion => query.filter(users::alert_discussion.eq(true)),
    };
    query.order(users::email.asc()).load(conn)
}

/// Queues one alert per subscribed, active user who shares a family with
/// the content and did not write it. Returns the number of queued emails.
pub fn notify_subscribers(
    conn: &mut PgConnection,
    config: &AppConfig,
    jwt: &JwtService,
    event: &ContentEvent,
) -> AppResult<usize> {
    let families = allowed_families(event.family_1.as_deref(), event.family_2.as_deref());
    let recipients: Vec<User> = subscribers(conn, event.category)?
        .into_iter()
        .filter(|user| Some(user.id) != event.author_id)
        .filter(|user| {
            allowed_families(user.family_1.as_deref(), user.family_2.as_deref())
                .iter()
                .any(|family| families.contains(family))
        })
        .collect();

    for user in &recipients {
        let token = jwt
            .generate_unsubscribe_token(user.id, event.category.as_str())
            .map_err(AppError::internal)?;
        let email = alert_email(config, user, event, &token);
        enqueue_email(conn, &email)?;
    }

    info!(
        category = event.category.as_str(),
        recipients = recipients.len(),
        "content alerts queued"
    );
    Ok(recipients.len())
}

/// Queues a message to the configured administrator address, if any.
pub fn notify_admin(
    conn: &mut PgConnection,
    config: &AppConfig,
    subject: &str,
    body: String,
) -> AppResult<bool> {
    let Some(to) = config.admin_notification_email.clone() else {
        return Ok(false);
    };
    enqueue_email(
        conn,
        &Email {
            to,
            to_name: None,
            subject: subject.to_string(),
            body,
        },
    )?;
    Ok(true)
}

fn display_name(user: &User) -> Option<String> {
    let name = format!("{} {}", user.first_name, user.last_name)
        .trim()
        .to_string();
    (!name.is_empty()).then_some(name)
}

pub fn alert_email(config: &AppConfig, user: &User, event: &ContentEvent, token: &str) -> Email {
    let link = format!("{}{}", config.frontend_url, event.path);
    let unsubscribe = format!(
        "{}/api/accounts/unsubscribe/{}/{}",
        config.backend_url,
        event.category.as_str(),
        token
    );
    Email {
        to: user.email.clone(),
        to_name: display_name(user),
        subject: event.category.subject().to_string(),
        body: format!(
            "Es wurde {} mit dem Titel \"{}\" erstellt.\n\n{}\n\n\
             Keine Benachrichtigungen dieser Art mehr erhalten:\n{}\n",
            event.category.noun(),
            event.title,
            link,
            unsubscribe
        ),
    }
}

pub fn activation_link(config: &AppConfig, uid: &str, token: &str) -> String {
    format!("{}/activate/{uid}/{token}/", config.backend_url)
}

pub fn password_reset_link(config: &AppConfig, uid: &str, token: &str) -> String {
    format!("{}/reset-password/{uid}/{token}/", config.frontend_url)
}

/// Sent to the guarantor, who activates the registrant by following the link.
pub fn guarantor_request_email(guarantor: &User, registrant: &User, link: &str) -> Email {
    Email {
        to: guarantor.email.clone(),
        to_name: display_name(guarantor),
        subject: "Bitte um Freischaltung eines neuen Benutzers".into(),
        body: format!(
            "{} {} ({}) hat sich registriert und dich als Bürgen angegeben.\n\n\
             Wenn du die Person kennst, schalte das Konto über diesen Link frei:\n{}\n",
            registrant.first_name, registrant.last_name, registrant.email, link
        ),
    }
}

/// Sent to a registrant without a guarantor.
pub fn registration_received_email(registrant: &User) -> Email {
    Email {
        to: registrant.email.clone(),
        to_name: display_name(registrant),
        subject: "Deine Registrierung".into(),
        body: "Vielen Dank für deine Registrierung.\n\n\
               Da du keinen Bürgen angegeben hast, melde dich bitte mit einer kurzen \
               Nachricht, wie du mit der Familie verbunden bist. Wir schalten dein Konto \
               danach frei.\n"
            .into(),
    }
}

pub fn account_activated_email(config: &AppConfig, user: &User) -> Email {
    Email {
        to: user.email.clone(),
        to_name: display_name(user),
        subject: "Dein Konto wurde freigeschaltet".into(),
        body: format!(
            "Dein Konto ist jetzt aktiv. Du kannst dich hier anmelden:\n{}/login\n",
            config.frontend_url
        ),
    }
}

pub fn guarantor_confirmation_email(guarantor_email: &str, user: &User) -> Email {
    Email {
        to: guarantor_email.to_string(),
        to_name: None,
        subject: "Freischaltung bestätigt".into(),
        body: format!(
            "Das Konto von {} {} ({}) wurde freigeschaltet.\n",
            user.first_name, user.last_name, user.email
        ),
    }
}

pub fn password_reset_email(user: &User, link: &str) -> Email {
    Email {
        to: user.email.clone(),
        to_name: display_name(user),
        subject: "Passwort zurücksetzen".into(),
        body: format!(
            "Über diesen Link kannst du ein neues Passwort setzen:\n{link}\n\n\
             Falls du das nicht angefordert hast, kannst du diese Nachricht ignorieren.\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/test".into(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".into(),
            server_port: 8000,
            backend_url: "https://api.example.com".into(),
            frontend_url: "https://example.com".into(),
            family_trees: vec!["kempe".into(), "huenten".into()],
            jwt_secret: "secret".into(),
            jwt_issuer: "stammbaum".into(),
            jwt_audience: "stammbaum-clients".into(),
            jwt_expiry_minutes: 15,
            account_token_audience: "stammbaum-accounts".into(),
            account_token_expiry_hours: 72,
            unsubscribe_token_audience: "stammbaum-unsubscribe".into(),
            media_url_expiry_minutes: 15,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".into(),
            s3_bucket: "bucket".into(),
            smtp_url: None,
            email_from: "noreply@example.com".into(),
            admin_notification_email: None,
        }
    }

    fn user() -> User {
        let now = Utc::now().naive_utc();
        User {
            id: Uuid::new_v4(),
            email: "anna@example.com".into(),
            username: "anna@example.com".into(),
            password_hash: String::new(),
            first_name: "Anna".into(),
            last_name: "Kempe".into(),
            author_name: "Anna Kempe".into(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            guarantor: false,
            guarantor_email: None,
            family_1: Some("kempe".into()),
            family_2: None,
            notes: None,
            alert_info: true,
            alert_faminfo: false,
            alert_recipe: false,
            alert_discussion: false,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn categories_round_trip_through_their_path_names() {
        for category in [
            AlertCategory::Info,
            AlertCategory::FamInfo,
            AlertCategory::Recipe,
            AlertCategory::Discussion,
        ] {
            assert_eq!(AlertCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(AlertCategory::parse("comment"), None);
    }

    #[test]
    fn alert_links_content_and_unsubscribe() {
        let event = ContentEvent {
            category: AlertCategory::Recipe,
            title: "Apfelkuchen".into(),
            author_id: None,
            family_1: Some("kempe".into()),
            family_2: None,
            path: "/recipes/1".into(),
        };
        let email = alert_email(&config(), &user(), &event, "tok");
        assert_eq!(email.to, "anna@example.com");
        assert_eq!(email.to_name.as_deref(), Some("Anna Kempe"));
        assert_eq!(email.subject, "Neues Rezept erstellt");
        assert!(email.body.contains("\"Apfelkuchen\""));
        assert!(email.body.contains("https://example.com/recipes/1"));
        assert!(email
            .body
            .contains("https://api.example.com/api/accounts/unsubscribe/recipe/tok"));
    }

    #[test]
    fn account_links_point_at_backend_and_frontend() {
        let config = config();
        assert_eq!(
            activation_link(&config, "dWlk", "tok"),
            "https://api.example.com/activate/dWlk/tok/"
        );
        assert_eq!(
            password_reset_link(&config, "dWlk", "tok"),
            "https://example.com/reset-password/dWlk/tok/"
        );
    }
}
