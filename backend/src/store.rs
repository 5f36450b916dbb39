use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::{with_conn, PgPool};
use crate::models::{
    Conversation, FileReference, Message, MessageRole, MessageRow, NewConversation,
    NewFileReference, NewMessage, NewProfile, Profile,
};
use crate::schema::{conversations, files, messages, profiles};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";
pub const CHAT_CONVERSATION_TITLE: &str = "New Chat";

#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>>;

    async fn create_profile(&self, user_id: Uuid, email: Option<String>) -> Result<Profile>;

    async fn create_conversation(&self, user_id: Uuid, title: &str) -> Result<Conversation>;

    async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// Most recently updated first.
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>>;

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<Message>;

    /// Oldest first.
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    async fn insert_file(&self, file: NewFileReference) -> Result<FileReference>;
}

pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        with_conn(&self.pool, move |conn| {
            profiles::table
                .find(user_id)
                .select(Profile::as_select())
                .first::<Profile>(conn)
                .optional()
                .context("failed to load profile")
        })
        .await
    }

    async fn create_profile(&self, user_id: Uuid, email: Option<String>) -> Result<Profile> {
        with_conn(&self.pool, move |conn| {
            diesel::insert_into(profiles::table)
                .values(&NewProfile { id: user_id, email })
                .returning(Profile::as_returning())
                .get_result::<Profile>(conn)
                .context("failed to insert profile")
        })
        .await
    }

    async fn create_conversation(&self, user_id: Uuid, title: &str) -> Result<Conversation> {
        let new_conversation = NewConversation {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
        };
        with_conn(&self.pool, move |conn| {
            diesel::insert_into(conversations::table)
                .values(&new_conversation)
                .returning(Conversation::as_returning())
                .get_result::<Conversation>(conn)
                .context("failed to insert conversation")
        })
        .await
    }

    async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        with_conn(&self.pool, move |conn| {
            conversations::table
                .find(conversation_id)
                .select(Conversation::as_select())
                .first::<Conversation>(conn)
                .optional()
                .context("failed to load conversation")
        })
        .await
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        with_conn(&self.pool, move |conn| {
            conversations::table
                .filter(conversations::user_id.eq(user_id))
                .order(conversations::updated_at.desc())
                .select(Conversation::as_select())
                .load::<Conversation>(conn)
                .context("failed to load conversations")
        })
        .await
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<Message> {
        let new_message = NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            role: role.as_str().to_string(),
            content: content.to_string(),
        };
        let row = with_conn(&self.pool, move |conn| {
            conn.transaction(|conn| {
                let row = diesel::insert_into(messages::table)
                    .values(&new_message)
                    .returning(MessageRow::as_returning())
                    .get_result::<MessageRow>(conn)?;
                diesel::update(conversations::table.find(conversation_id))
                    .set(conversations::updated_at.eq(Utc::now()))
                    .execute(conn)?;
                Ok::<_, diesel::result::Error>(row)
            })
            .context("failed to insert message")
        })
        .await?;
        row.try_into()
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let rows = with_conn(&self.pool, move |conn| {
            messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .order(messages::created_at.asc())
                .select(MessageRow::as_select())
                .load::<MessageRow>(conn)
                .context("failed to load messages")
        })
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn insert_file(&self, file: NewFileReference) -> Result<FileReference> {
        with_conn(&self.pool, move |conn| {
            diesel::insert_into(files::table)
                .values(&file)
                .returning(FileReference::as_returning())
                .get_result::<FileReference>(conn)
                .context("failed to insert file reference")
        })
        .await
    }
}

/// Failure-swallowing view over a [`ConversationStore`].
///
/// Every error is logged and turned into an absent result, so a failed write
/// never interrupts a chat exchange.
#[derive(Clone)]
pub struct History {
    store: Arc<dyn ConversationStore>,
}

impl History {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub async fn profile(&self, user_id: Uuid) -> Option<Profile> {
        match self.store.find_profile(user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(%user_id, error = %format!("{err:#}"), "failed to get user profile");
                None
            }
        }
    }

    /// Creates the profile row conversations hang off when none exists yet.
    /// Without a known email a `<id>@temp.com` placeholder is stored.
    pub async fn ensure_profile(&self, user_id: Uuid, email: Option<&str>) -> Option<Profile> {
        match self.store.find_profile(user_id).await {
            Ok(Some(profile)) => return Some(profile),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%user_id, error = %format!("{err:#}"), "failed to look up profile");
                return None;
            }
        }

        match self
            .store
            .create_profile(
                user_id,
                Some(email.map_or_else(|| format!("{user_id}@temp.com"), str::to_string)),
            )
            .await
        {
            Ok(profile) => {
                tracing::info!(%user_id, "created profile");
                Some(profile)
            }
            Err(err) => {
                tracing::warn!(%user_id, error = %format!("{err:#}"), "failed to create profile");
                None
            }
        }
    }

    pub async fn create_conversation(&self, user_id: Uuid, title: &str) -> Option<Conversation> {
        match self.store.create_conversation(user_id, title).await {
            Ok(conversation) => Some(conversation),
            Err(err) => {
                tracing::warn!(
                    %user_id,
                    error = %format!("{err:#}"),
                    "failed to create conversation"
                );
                None
            }
        }
    }

    /// Creates a conversation for `user_id`, creating the owning profile first
    /// when the user has none.
    pub async fn start_conversation(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        title: &str,
    ) -> Option<Conversation> {
        self.ensure_profile(user_id, email).await?;
        self.create_conversation(user_id, title).await
    }

    /// The conversation, if it exists and belongs to `user_id`.
    pub async fn owned_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Option<Conversation> {
        match self.store.find_conversation(conversation_id).await {
            Ok(conversation) => conversation.filter(|conversation| conversation.user_id == user_id),
            Err(err) => {
                tracing::warn!(
                    %conversation_id,
                    error = %format!("{err:#}"),
                    "failed to get conversation"
                );
                None
            }
        }
    }

    pub async fn user_conversations(&self, user_id: Uuid) -> Vec<Conversation> {
        self.store
            .list_conversations(user_id)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(
                    %user_id,
                    error = %format!("{err:#}"),
                    "failed to get conversations"
                );
                Vec::new()
            })
    }

    pub async fn save_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Option<Message> {
        match self
            .store
            .insert_message(conversation_id, role, content)
            .await
        {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::warn!(
                    %conversation_id,
                    %role,
                    error = %format!("{err:#}"),
                    "failed to save message"
                );
                None
            }
        }
    }

    pub async fn conversation_messages(&self, conversation_id: Uuid) -> Vec<Message> {
        self.store
            .list_messages(conversation_id)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(
                    %conversation_id,
                    error = %format!("{err:#}"),
                    "failed to get messages"
                );
                Vec::new()
            })
    }

    pub async fn attach_file(&self, file: NewFileReference) -> Option<FileReference> {
        let message_id = file.message_id;
        match self.store.insert_file(file).await {
            Ok(reference) => Some(reference),
            Err(err) => {
                tracing::warn!(
                    %message_id,
                    error = %format!("{err:#}"),
                    "failed to record file reference"
                );
                None
            }
        }
    }
}
