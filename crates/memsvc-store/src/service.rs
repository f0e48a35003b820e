use std::sync::Arc;

use memsvc_access::{AccessControl, AccessError};
use memsvc_core::cursor::Cursor;
use memsvc_core::types::{new_id, AccessLevel, Channel, EpochFilter, Identity, ListMode};
use rusqlite::params;
use serde_json::Value;

use crate::conversations::ConversationRepository;
use crate::db::Db;
use crate::entries::EntryRepository;
use crate::error::{Result, StoreError};
use crate::groups::GroupRepository;
use crate::memberships::MembershipRepository;
use crate::transfers::TransferRepository;
use crate::types::{Conversation, ContentBlock, CreateEntryRequest, Entry, ForkSummary, Membership, OwnershipTransfer, Page};

const HISTORY_SCAN_PAGE: usize = 500;

/// The only entry point the API layer calls for conversation-store
/// operations. Composes the low-level repository traits
/// (`Db` implements all of them) with the access-control engine so every
/// operation enforces its own requirement before touching a row.
pub struct ConversationStore {
    db: Arc<Db>,
    access: Arc<AccessControl>,
}

impl ConversationStore {
    pub fn new(db: Arc<Db>, access: Arc<AccessControl>) -> Self {
        Self { db, access }
    }

    pub fn create_conversation(
        &self,
        actor: &Identity,
        title: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<Conversation> {
        let group_id = new_id();
        let conversation_id = new_id();
        self.db.insert_group(&group_id, None, None)?;
        let conversation = self.db.insert_conversation(
            &conversation_id,
            &group_id,
            &actor.user_id,
            title,
            metadata.as_ref(),
            None,
            None,
        )?;
        self.db.insert_membership(&group_id, &actor.user_id, AccessLevel::Owner)?;
        Ok(conversation)
    }

    /// `query` is an optional case-insensitive substring filter over the
    /// decrypted title, applied within the already-fetched page. It is a
    /// convenience for small result sets; `search_conversations` is the
    /// operation that actually scales via FTS5.
    pub fn list_conversations(
        &self,
        actor: &Identity,
        query: Option<&str>,
        mode: ListMode,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Conversation>> {
        let page = self.db.list_conversations(&actor.user_id, mode, after, limit)?;
        match query {
            None => Ok(page),
            Some(q) => {
                let needle = q.to_lowercase();
                let data = page
                    .data
                    .into_iter()
                    .filter(|c| {
                        c.title
                            .as_deref()
                            .map(|t| t.to_lowercase().contains(&needle))
                            .unwrap_or(false)
                    })
                    .collect();
                Ok(Page {
                    data,
                    next_cursor: page.next_cursor,
                })
            }
        }
    }

    pub fn get_conversation(&self, actor: &Identity, id: &str) -> Result<Conversation> {
        let conv = self
            .db
            .get_conversation(id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        self.access
            .require_at_least(actor, &conv.conversation_group_id, AccessLevel::Reader)?;
        Ok(conv)
    }

    pub fn delete_conversation(
        &self,
        actor: &Identity,
        id: &str,
        justification: Option<&str>,
    ) -> Result<()> {
        let conv = self
            .db
            .get_conversation(id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        self.access.require_at_least_justified(
            actor,
            &conv.conversation_group_id,
            AccessLevel::Manager,
            justification,
        )?;
        self.db.soft_delete_conversation(id)
    }

    /// Writes a `HISTORY` entry; auto-creates the conversation (and an
    /// `OWNER` membership for the caller) if `conversation_id` doesn't exist
    /// yet — the "optimistic create" path.
    pub fn append_user_entry(
        &self,
        actor: &Identity,
        conversation_id: &str,
        content: Vec<ContentBlock>,
    ) -> Result<Entry> {
        let conv = match self.db.get_conversation(conversation_id)? {
            Some(conv) => {
                self.access
                    .require_at_least(actor, &conv.conversation_group_id, AccessLevel::Writer)?;
                conv
            }
            None => {
                let group_id = new_id();
                self.db.insert_group(&group_id, None, None)?;
                let conv = self.db.insert_conversation(
                    conversation_id,
                    &group_id,
                    &actor.user_id,
                    None,
                    None,
                    None,
                    None,
                )?;
                self.db.insert_membership(&group_id, &actor.user_id, AccessLevel::Owner)?;
                conv
            }
        };

        let request = CreateEntryRequest {
            channel: Channel::History,
            content,
            memory_epoch: None,
        };
        let entry = self.db.insert_entry(
            conversation_id,
            &conv.conversation_group_id,
            Some(&actor.user_id),
            None,
            &request,
        )?;
        self.db.touch_updated_at(conversation_id)?;
        self.maybe_derive_title(&conv, &entry)?;
        Ok(entry)
    }

    /// Bulk append for agent-authenticated callers. `client_id` is stamped
    /// on every created entry; `HISTORY` entries bump `updated_at` (once per
    /// call); `MEMORY` entries require a supplied `memory_epoch`.
    pub fn append_agent_entries(
        &self,
        actor: &Identity,
        conversation_id: &str,
        requests: Vec<CreateEntryRequest>,
        client_id: &str,
    ) -> Result<Vec<Entry>> {
        let conv = self
            .db
            .get_conversation(conversation_id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        self.access
            .require_at_least(actor, &conv.conversation_group_id, AccessLevel::Writer)?;

        let mut out = Vec::with_capacity(requests.len());
        let mut bumped = false;
        for request in &requests {
            if request.channel == Channel::Memory && request.memory_epoch.is_none() {
                return Err(StoreError::BadRequest(
                    "MEMORY entries require a memory_epoch".to_string(),
                ));
            }
            let entry = self.db.insert_entry(
                conversation_id,
                &conv.conversation_group_id,
                None,
                Some(client_id),
                request,
            )?;
            if request.channel == Channel::History && !bumped {
                self.db.touch_updated_at(conversation_id)?;
                self.maybe_derive_title(&conv, &entry)?;
                bumped = true;
            }
            out.push(entry);
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn get_entries(
        &self,
        actor: &Identity,
        conversation_id: &str,
        channel: Option<Channel>,
        after: Option<&str>,
        limit: usize,
        epoch_filter: Option<EpochFilter>,
        client_id: Option<&str>,
    ) -> Result<Page<Entry>> {
        let conv = self
            .db
            .get_conversation(conversation_id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        self.access
            .require_at_least(actor, &conv.conversation_group_id, AccessLevel::Reader)?;

        match channel.unwrap_or(Channel::History) {
            Channel::History => self.get_history_page(conversation_id, after, limit),
            Channel::Memory => {
                let client_id = client_id.ok_or_else(|| {
                    StoreError::BadRequest("client_id is required for the MEMORY channel".to_string())
                })?;
                self.get_memory_page(conversation_id, client_id, epoch_filter.unwrap_or(EpochFilter::All), after, limit)
            }
            Channel::Summary => self.db.list_channel_entries(conversation_id, Channel::Summary, None, after, limit),
        }
    }

    pub fn fork_conversation_at_entry(
        &self,
        actor: &Identity,
        conversation_id: &str,
        entry_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let conv = self
            .db
            .get_conversation(conversation_id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        self.access
            .require_at_least(actor, &conv.conversation_group_id, AccessLevel::Writer)?;

        let entry = self
            .db
            .get_entry(entry_id)?
            .ok_or_else(|| StoreError::BadRequest(format!("entry {entry_id} not found")))?;
        if entry.conversation_id != conversation_id {
            return Err(StoreError::BadRequest(
                "entry does not belong to this conversation".to_string(),
            ));
        }
        if entry.channel != Channel::History {
            return Err(StoreError::BadRequest(
                "only HISTORY entries may be fork anchors".to_string(),
            ));
        }

        let anchor = self.db.previous_history_entry(conversation_id, entry_id)?;
        let fork_id = new_id();
        self.db.insert_conversation(
            &fork_id,
            &conv.conversation_group_id,
            &conv.owner_user_id,
            title,
            None,
            Some(conversation_id),
            anchor.as_ref().map(|a| a.id.as_str()),
        )
    }

    pub fn list_forks(&self, actor: &Identity, conversation_id: &str) -> Result<Vec<ForkSummary>> {
        let conv = self
            .db
            .get_conversation(conversation_id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        self.access
            .require_at_least(actor, &conv.conversation_group_id, AccessLevel::Reader)?;
        self.db.list_forks(conversation_id)
    }

    pub fn add_summary(
        &self,
        actor: &Identity,
        conversation_id: &str,
        summary: &str,
        title: Option<&str>,
        until_entry_id: Option<&str>,
    ) -> Result<Entry> {
        let conv = self
            .db
            .get_conversation(conversation_id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        self.access
            .require_at_least(actor, &conv.conversation_group_id, AccessLevel::Writer)?;

        let mut block = serde_json::json!({"type": "summary", "text": summary});
        if let Some(title) = title {
            block["title"] = Value::String(title.to_string());
        }
        if let Some(until) = until_entry_id {
            block["until_entry_id"] = Value::String(until.to_string());
        }

        let request = CreateEntryRequest {
            channel: Channel::Summary,
            content: vec![block],
            memory_epoch: None,
        };
        // Does not bump `updated_at` — invariant 4 only applies to HISTORY writes.
        self.db
            .insert_entry(conversation_id, &conv.conversation_group_id, Some(&actor.user_id), None, &request)
    }

    pub fn list_memberships(&self, actor: &Identity, group_id: &str) -> Result<Vec<Membership>> {
        self.access.require_at_least(actor, group_id, AccessLevel::Manager)?;
        self.db.list_memberships(group_id)
    }

    pub fn share_conversation(
        &self,
        actor: &Identity,
        group_id: &str,
        user_id: &str,
        level: AccessLevel,
    ) -> Result<()> {
        self.access.require_at_least(actor, group_id, AccessLevel::Manager)?;
        self.db.insert_membership(group_id, user_id, level)
    }

    pub fn update_membership(
        &self,
        actor: &Identity,
        group_id: &str,
        user_id: &str,
        level: AccessLevel,
    ) -> Result<()> {
        self.access.require_at_least(actor, group_id, AccessLevel::Manager)?;
        self.db.update_membership(group_id, user_id, level)
    }

    pub fn delete_membership(&self, actor: &Identity, group_id: &str, user_id: &str) -> Result<()> {
        self.access.require_at_least(actor, group_id, AccessLevel::Manager)?;
        self.db.delete_membership(group_id, user_id)
    }

    pub fn create_transfer(
        &self,
        actor: &Identity,
        group_id: &str,
        to_user_id: &str,
    ) -> Result<OwnershipTransfer> {
        self.access.require_at_least(actor, group_id, AccessLevel::Owner)?;
        if to_user_id == actor.user_id {
            return Err(StoreError::BadRequest("cannot transfer ownership to yourself".to_string()));
        }
        if self.db.get_membership(group_id, to_user_id)?.is_none() {
            return Err(StoreError::BadRequest(
                "transfer target must already be a member of the group".to_string(),
            ));
        }
        self.db.insert_pending_transfer(group_id, &actor.user_id, to_user_id)
    }

    pub fn accept_transfer(&self, actor: &Identity, transfer_id: &str) -> Result<()> {
        let transfer = self
            .db
            .get_transfer(transfer_id)?
            .ok_or_else(|| StoreError::NotFound(format!("transfer {transfer_id}")))?;
        if transfer.to_user_id != actor.user_id {
            return Err(StoreError::Access(AccessError::AccessDenied(
                "only the transfer recipient may accept it".to_string(),
            )));
        }
        self.db
            .update_membership(&transfer.conversation_group_id, &transfer.to_user_id, AccessLevel::Owner)?;
        self.db
            .update_membership(&transfer.conversation_group_id, &transfer.from_user_id, AccessLevel::Manager)?;
        self.db.delete_transfer(transfer_id)
    }

    pub fn decline_or_cancel_transfer(&self, actor: &Identity, transfer_id: &str) -> Result<()> {
        let transfer = self
            .db
            .get_transfer(transfer_id)?
            .ok_or_else(|| StoreError::NotFound(format!("transfer {transfer_id}")))?;
        if actor.user_id != transfer.from_user_id && actor.user_id != transfer.to_user_id {
            return Err(StoreError::Access(AccessError::AccessDenied(
                "only a party to the transfer may cancel or decline it".to_string(),
            )));
        }
        self.db.delete_transfer(transfer_id)
    }

    /// FTS5 match over `HISTORY`/`SUMMARY` plaintext, scoped to the actor's
    /// visible groups. Returns a single ranked page; deep pagination over
    /// relevance order is not implemented (see DESIGN.md).
    pub fn search_conversations(&self, actor: &Identity, query: &str, limit: usize) -> Result<Vec<Conversation>> {
        let conversation_ids: Vec<String> = {
            let conn = self.db.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT DISTINCT f.conversation_id
                 FROM entries_fts f
                 JOIN entries e ON e.id = f.entry_id
                 JOIN memberships m ON m.conversation_group_id = e.conversation_group_id
                 WHERE entries_fts MATCH ?1 AND m.user_id = ?2
                 ORDER BY rank
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![query, actor.user_id, limit as i64], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut out = Vec::with_capacity(conversation_ids.len());
        for id in conversation_ids {
            if let Some(conv) = self.db.get_conversation(&id)? {
                out.push(conv);
            }
        }
        Ok(out)
    }

    fn maybe_derive_title(&self, conv: &Conversation, entry: &Entry) -> Result<()> {
        if conv.title.is_some() {
            return Ok(());
        }
        if let Some(title) = derive_title(&entry.content) {
            self.db.set_title_if_absent(&conv.id, &title)?;
        }
        Ok(())
    }

    fn get_history_page(&self, conversation_id: &str, after: Option<&str>, limit: usize) -> Result<Page<Entry>> {
        let all = self.resolve_history(conversation_id)?;
        let cursor = after.map(Cursor::decode).transpose().map_err(StoreError::BadRequest)?;

        let tail: Vec<Entry> = match &cursor {
            None => all,
            Some(c) => all
                .into_iter()
                .filter(|e| (e.created_at.as_str(), e.id.as_str()) > (c.updated_at.as_str(), c.id.as_str()))
                .collect(),
        };

        let has_more = tail.len() > limit;
        let data: Vec<Entry> = tail.into_iter().take(limit).collect();
        let next_cursor = if has_more {
            data.last().map(|e| {
                Cursor {
                    updated_at: e.created_at.clone(),
                    id: e.id.clone(),
                }
                .encode()
            })
        } else {
            None
        };
        Ok(Page { data, next_cursor })
    }

    /// Walks fork ancestry to assemble the full `HISTORY` sequence: the
    /// parent's history up to and including the fork anchor, then this
    /// conversation's own entries.
    fn resolve_history(&self, conversation_id: &str) -> Result<Vec<Entry>> {
        let conv = self
            .db
            .get_conversation(conversation_id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;

        let mut entries = if let (Some(parent_id), Some(anchor_id)) =
            (&conv.forked_at_conversation_id, &conv.forked_at_entry_id)
        {
            let parent_history = self.resolve_history(parent_id)?;
            match parent_history.iter().position(|e| &e.id == anchor_id) {
                Some(pos) => parent_history.into_iter().take(pos + 1).collect(),
                None => parent_history,
            }
        } else {
            Vec::new()
        };

        let mut after: Option<String> = None;
        loop {
            let page = self
                .db
                .list_channel_entries(conversation_id, Channel::History, None, after.as_deref(), HISTORY_SCAN_PAGE)?;
            let reached_end = page.next_cursor.is_none();
            entries.extend(page.data);
            if reached_end {
                break;
            }
            after = page.next_cursor;
        }
        Ok(entries)
    }

    fn get_memory_page(
        &self,
        conversation_id: &str,
        client_id: &str,
        epoch_filter: EpochFilter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Entry>> {
        match epoch_filter {
            EpochFilter::All => self.db.list_channel_entries(conversation_id, Channel::Memory, Some(client_id), after, limit),
            EpochFilter::Latest => match self.db.latest_memory_epoch(conversation_id, client_id)? {
                None => Ok(Page { data: Vec::new(), next_cursor: None }),
                Some(epoch) => {
                    let entries = self.db.entries_for_epoch(conversation_id, client_id, epoch)?;
                    paginate_in_memory(entries, after, limit)
                }
            },
            EpochFilter::Epoch(epoch) => {
                let entries = self.db.entries_for_epoch(conversation_id, client_id, epoch)?;
                paginate_in_memory(entries, after, limit)
            }
        }
    }
}

fn paginate_in_memory(entries: Vec<Entry>, after: Option<&str>, limit: usize) -> Result<Page<Entry>> {
    let cursor = after.map(Cursor::decode).transpose().map_err(StoreError::BadRequest)?;
    let tail: Vec<Entry> = match &cursor {
        None => entries,
        Some(c) => entries
            .into_iter()
            .filter(|e| (e.created_at.as_str(), e.id.as_str()) > (c.updated_at.as_str(), c.id.as_str()))
            .collect(),
    };
    let has_more = tail.len() > limit;
    let data: Vec<Entry> = tail.into_iter().take(limit).collect();
    let next_cursor = if has_more {
        data.last().map(|e| {
            Cursor {
                updated_at: e.created_at.clone(),
                id: e.id.clone(),
            }
            .encode()
        })
    } else {
        None
    };
    Ok(Page { data, next_cursor })
}

/// First text content block, whitespace-collapsed, truncated to 40 chars.
fn derive_title(content: &[ContentBlock]) -> Option<String> {
    let text = content.iter().find_map(|b| b.get("text").and_then(|t| t.as_str()))?;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(40).collect())
}
