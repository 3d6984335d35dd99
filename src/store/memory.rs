//! In-process store. One mutex guards everything, which also makes the
//! conversation upsert atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Alert, Prediction, Store, StoreError, StudentRecord};
use crate::conversation::ChatConversation;

#[derive(Default)]
struct Tables {
    students: HashMap<String, StudentRecord>,
    predictions: Vec<Prediction>,
    alerts: Vec<Alert>,
    conversations: HashMap<String, ChatConversation>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn conversation_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.conversations.len())
    }

    pub fn alert_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.alerts.len())
    }

    pub fn prediction_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.predictions.len())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_student(&self, student: &StudentRecord) -> Result<(), StoreError> {
        self.lock()?
            .students
            .insert(student.student_id.clone(), student.clone());
        Ok(())
    }

    async fn student(&self, student_id: &str) -> Result<Option<StudentRecord>, StoreError> {
        Ok(self.lock()?.students.get(student_id).cloned())
    }

    async fn insert_prediction(&self, prediction: &Prediction) -> Result<(), StoreError> {
        self.lock()?.predictions.push(prediction.clone());
        Ok(())
    }

    async fn predictions_for(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError> {
        let t = self.lock()?;
        Ok(t.predictions
            .iter()
            .rev()
            .filter(|p| p.student_id == student_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.lock()?.alerts.push(alert.clone());
        Ok(())
    }

    async fn alerts_for(&self, student_id: &str) -> Result<Vec<Alert>, StoreError> {
        let t = self.lock()?;
        Ok(t.alerts
            .iter()
            .rev()
            .filter(|a| a.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn conversation_for(
        &self,
        student_id: &str,
    ) -> Result<Option<ChatConversation>, StoreError> {
        Ok(self.lock()?.conversations.get(student_id).cloned())
    }

    async fn upsert_conversation(
        &self,
        conversation: &ChatConversation,
    ) -> Result<ChatConversation, StoreError> {
        let mut t = self.lock()?;
        let mut row = conversation.clone();
        if let Some(existing) = t.conversations.get(&conversation.student_id) {
            row.id = existing.id;
            row.escalation_flag |= existing.escalation_flag;
        }
        t.conversations.insert(row.student_id.clone(), row.clone());
        Ok(row)
    }
}
