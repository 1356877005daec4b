//! The reconciling cache: the running session's single source of truth for
//! food logs.
//!
//! Every mutation is validated strictly, committed to the in-memory map,
//! mirrored to the local backup before the call returns, and then pushed to
//! the remote store behind a per-date trailing debounce. Remote failures never
//! roll back a commit; they land in the error ledger and the record is marked
//! [`SyncStatus::Failed`] until a retry succeeds.
//!
//! Records arriving from outside (remote pulls, backup recovery) go through
//! lenient validation and are merged last-writer-wins on `updated_at`.

pub mod debounce;
pub mod diff;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, SubsecRound, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::models::audit::{
    AuditAction, AuditEntry, AuditSource, DataError, ErrorSource, RingBuffer,
};
use crate::models::daily_log::{
    date_key, DailyLog, DailyLogPatch, HealthMetric, MealPatch, MealType, SnackPatch, SnackType,
};
use crate::storage::{LocalBackup, RemoteError, RemoteResult, RemoteStore};
use crate::validation::{
    salvage, validate_and_migrate, validate_record, FieldMigration, InvalidRecord, Migrated,
};

pub use debounce::Debouncer;
pub use diff::{changed_fields, FieldChange};

/// Where a cached record stands against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// Never meant for the remote store: no user signed in, or never edited.
    LocalOnly,
    /// Edited locally, remote save scheduled or in flight.
    Pending,
    /// Matches the last copy the remote store accepted.
    Synced,
    /// The last remote save failed; the local copy is still authoritative.
    Failed,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub save_debounce: Duration,
    pub recent_sync_limit: usize,
    pub audit_capacity: usize,
    pub error_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            save_debounce: Duration::from_millis(1000),
            recent_sync_limit: 90,
            audit_capacity: 1000,
            error_capacity: 100,
        }
    }
}

/// Outcome of a batch operation: sync, recovery, range load, or health check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordReport {
    pub valid: usize,
    pub invalid: usize,
    pub errors: Vec<String>,
}

/// A cached record together with its sync status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    #[serde(flatten)]
    pub log: DailyLog,
    pub sync_status: SyncStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub current_date: NaiveDate,
    pub user_id: Option<String>,
    pub loading: bool,
    pub saving: bool,
    pub syncing: bool,
    pub error: Option<String>,
    pub records: usize,
    pub pending_saves: usize,
    pub failed_saves: usize,
    pub unresolved_errors: usize,
    pub needs_recovery: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Remote,
    Backup,
}

struct StoreState {
    logs: BTreeMap<NaiveDate, DailyLog>,
    sync: HashMap<NaiveDate, SyncStatus>,
    current_date: NaiveDate,
    user_id: Option<String>,
    loading: HashSet<NaiveDate>,
    /// Days deleted by a signed-in user, so a save already in flight for one
    /// of them can be undone when it lands.
    deleted: HashSet<(String, NaiveDate)>,
    saving: usize,
    syncing: bool,
    error: Option<String>,
    audit: RingBuffer<AuditEntry>,
    errors: RingBuffer<DataError>,
}

impl StoreState {
    fn audit(
        &mut self,
        date: NaiveDate,
        action: AuditAction,
        source: AuditSource,
        field: Option<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) {
        self.audit.push(AuditEntry {
            timestamp: Utc::now(),
            user_id: self.user_id.clone(),
            date: date_key(date),
            action,
            source,
            field,
            old_value,
            new_value,
        });
    }

    fn record_error(&mut self, error: DataError) {
        tracing::warn!(
            operation = %error.operation,
            date = ?error.date,
            error = %error.error,
            "Recorded data error"
        );
        self.errors.push(error);
    }

    fn put(&mut self, log: DailyLog) {
        if let Some(uid) = &log.user_id {
            self.deleted.remove(&(uid.clone(), log.date));
        }
        self.logs.insert(log.date, log);
    }

    fn status_of(&self, date: NaiveDate) -> SyncStatus {
        self.sync.get(&date).copied().unwrap_or(SyncStatus::LocalOnly)
    }

    fn view(&self, date: NaiveDate) -> Option<LogView> {
        self.logs.get(&date).map(|log| LogView {
            log: log.clone(),
            sync_status: self.status_of(date),
        })
    }

    fn needs_recovery(&self) -> bool {
        let flagged = self.error.as_deref().is_some_and(|e| {
            let e = e.to_lowercase();
            e.contains("validation") || e.contains("data")
        });
        flagged
            || self
                .errors
                .iter()
                .any(|e| !e.resolved && e.source == ErrorSource::Remote)
    }
}

struct Inner {
    state: Mutex<StoreState>,
    backup: LocalBackup,
    remote: Option<Arc<dyn RemoteStore>>,
    saves: Debouncer<NaiveDate>,
    settings: StoreSettings,
}

/// Handle to the reconciling cache. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct FoodLogStore {
    inner: Arc<Inner>,
}

/// Postgres keeps microseconds; stamps are truncated so a round trip through
/// the remote store compares equal. Strictly after `prev` when given.
pub(crate) fn next_stamp(prev: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match prev {
        Some(prev) if now <= prev => prev + ChronoDuration::microseconds(1),
        _ => now,
    }
}

/// Whether a backup entry may be read while `user_id` is signed in. Entries
/// written while signed out carry no owner and go to whoever signs in.
fn owned_by(raw: &Value, user_id: Option<&str>) -> bool {
    match raw.get("userId").and_then(Value::as_str).filter(|u| !u.is_empty()) {
        None => true,
        Some(owner) => Some(owner) == user_id,
    }
}

impl FoodLogStore {
    pub fn new(
        backup: LocalBackup,
        remote: Option<Arc<dyn RemoteStore>>,
        settings: StoreSettings,
    ) -> Self {
        let state = StoreState {
            logs: BTreeMap::new(),
            sync: HashMap::new(),
            current_date: Local::now().date_naive(),
            user_id: None,
            loading: HashSet::new(),
            deleted: HashSet::new(),
            saving: 0,
            syncing: false,
            error: None,
            audit: RingBuffer::new(settings.audit_capacity),
            errors: RingBuffer::new(settings.error_capacity),
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                backup,
                remote,
                saves: Debouncer::new(settings.save_debounce),
                settings,
            }),
        }
    }

    pub fn backup(&self) -> &LocalBackup {
        &self.inner.backup
    }

    pub fn remote(&self) -> Option<Arc<dyn RemoteStore>> {
        self.inner.remote.clone()
    }

    pub async fn user_id(&self) -> Option<String> {
        self.inner.state.lock().await.user_id.clone()
    }

    // ---- session ----

    /// Follow the signed-in user.
    ///
    /// Anonymous to signed-in keeps the cached days, adopts them for the user
    /// and merges the user's recent remote records over them. Signing out or
    /// switching users flushes pending saves and empties the cache.
    pub async fn set_user_id(&self, user_id: Option<String>) -> RemoteResult<RecordReport> {
        let previous = self.user_id().await;
        if previous == user_id {
            return Ok(RecordReport::default());
        }
        if previous.is_some() {
            self.flush().await;
        }

        let adopted = {
            let mut state = self.inner.state.lock().await;
            state.user_id = user_id.clone();
            let mut adopted = Vec::new();
            match (&previous, &user_id) {
                (None, Some(uid)) => {
                    for (date, log) in state.logs.iter_mut() {
                        if log.user_id.is_none() {
                            log.user_id = Some(uid.clone());
                            adopted.push(*date);
                        }
                    }
                    for date in &adopted {
                        state.sync.insert(*date, SyncStatus::Pending);
                    }
                }
                _ => {
                    self.inner.saves.take_all();
                    state.logs.clear();
                    state.sync.clear();
                    state.loading.clear();
                    state.error = None;
                }
            }
            tracing::info!(
                user_id = ?user_id,
                adopted = adopted.len(),
                "Session user changed"
            );
            adopted
        };

        if user_id.is_none() || self.inner.remote.is_none() {
            return Ok(RecordReport::default());
        }
        let report = self.sync_recent().await;

        let state = self.inner.state.lock().await;
        for date in adopted {
            if state.status_of(date) == SyncStatus::Pending {
                self.schedule_save(date);
            }
        }
        report
    }

    /// Re-pull the user's recent remote records and merge them in.
    pub async fn sync_all_data(&self) -> RemoteResult<RecordReport> {
        self.sync_recent().await
    }

    async fn sync_recent(&self) -> RemoteResult<RecordReport> {
        let (remote, user_id) = self.signed_in().await?;
        self.inner.state.lock().await.syncing = true;

        let result = remote
            .get_recent(&user_id, self.inner.settings.recent_sync_limit)
            .await;

        let mut state = self.inner.state.lock().await;
        state.syncing = false;
        let raws = match result {
            Ok(raws) => raws,
            Err(e) => {
                state.error = Some(e.user_message());
                state.record_error(DataError::new("syncAllData", ErrorSource::Remote, e.to_string()));
                return Err(e);
            }
        };
        if state.user_id.as_deref() != Some(user_id.as_str()) {
            tracing::info!(user_id = %user_id, "Discarding sync results for a previous session");
            return Ok(RecordReport::default());
        }

        let report = self.merge_batch(&mut state, raws, Origin::Remote, "syncAllData");
        tracing::info!(
            user_id = %user_id,
            valid = report.valid,
            invalid = report.invalid,
            "Synced recent food logs"
        );
        Ok(report)
    }

    async fn signed_in(&self) -> RemoteResult<(Arc<dyn RemoteStore>, String)> {
        let Some(remote) = self.inner.remote.clone() else {
            return Err(RemoteError::Other("no remote store is configured".into()));
        };
        match self.user_id().await {
            Some(user_id) => Ok((remote, user_id)),
            None => Err(RemoteError::Permission("not signed in".into())),
        }
    }

    // ---- reads ----

    pub async fn set_current_date(&self, date: NaiveDate) {
        self.inner.state.lock().await.current_date = date;
    }

    pub async fn get(&self, date: NaiveDate) -> Option<LogView> {
        self.inner.state.lock().await.view(date)
    }

    pub async fn logs_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<DailyLog> {
        let state = self.inner.state.lock().await;
        state.logs.range(start..=end).map(|(_, log)| log.clone()).collect()
    }

    /// Load one day: remote when signed in, then the local backup, then a
    /// salvaged copy of any invalid stored record, then an empty day.
    ///
    /// Returns the cached record straight away when present, and `None` when
    /// another load of the same date is already in flight.
    pub async fn load_food_log(&self, date: NaiveDate) -> Option<LogView> {
        let user_id = {
            let mut state = self.inner.state.lock().await;
            if let Some(view) = state.view(date) {
                return Some(view);
            }
            if !state.loading.insert(date) {
                return None;
            }
            state.user_id.clone()
        };

        let remote_raw = match (&self.inner.remote, &user_id) {
            (Some(remote), Some(uid)) => match remote.get_by_date(uid, date).await {
                Ok(raw) => raw,
                Err(e) => {
                    let mut state = self.inner.state.lock().await;
                    state.error = Some(e.user_message());
                    state.record_error(
                        DataError::new("loadFoodLog", ErrorSource::Remote, e.to_string())
                            .for_date(date_key(date)),
                    );
                    None
                }
            },
            _ => None,
        };

        let mut state = self.inner.state.lock().await;
        state.loading.remove(&date);
        if let Some(view) = state.view(date) {
            // An update committed while the load was in flight.
            return Some(view);
        }
        if state.user_id != user_id {
            return None;
        }

        let backup_raw = self.inner.backup.load(date).filter(|raw| {
            let readable = owned_by(raw, user_id.as_deref());
            if !readable {
                tracing::debug!(date = %date, "Ignoring local backup owned by another user");
            }
            readable
        });

        let mut rejected: Option<Value> = None;
        let candidates = [(Origin::Remote, remote_raw), (Origin::Backup, backup_raw)];
        for (origin, raw) in candidates {
            let Some(raw) = raw else { continue };
            match validate_and_migrate(&raw) {
                Ok(migrated) if migrated.log.date == date => {
                    self.merge_one(&mut state, migrated, origin);
                    return state.view(date);
                }
                Ok(migrated) => {
                    state.record_error(
                        DataError::new(
                            "loadFoodLog",
                            ErrorSource::Validation,
                            format!("stored record is dated {}", migrated.log.date),
                        )
                        .for_date(date_key(date))
                        .with_data(raw.clone()),
                    );
                }
                Err(e) => {
                    state.error = Some(format!("Stored data for {date} failed validation"));
                    state.record_error(
                        DataError::new("loadFoodLog", ErrorSource::Validation, e.to_string())
                            .for_date(date_key(date))
                            .with_data(raw.clone()),
                    );
                    rejected.get_or_insert(raw);
                }
            }
        }

        let stamp = next_stamp(None);
        match rejected {
            Some(raw) => {
                let (log, reset) = salvage(&raw, date, user_id.clone(), stamp);
                tracing::warn!(date = %date, reset = ?reset, "Salvaged invalid stored record");
                for field in &reset {
                    state.audit(
                        date,
                        AuditAction::Migrate,
                        AuditSource::System,
                        Some(field.clone()),
                        None,
                        None,
                    );
                }
                self.inner.backup.save(date, &log);
                state.put(log);
                self.mark_dirty(&mut state, date);
            }
            None => {
                state.put(DailyLog::empty(date, user_id, stamp));
                state.sync.insert(date, SyncStatus::LocalOnly);
            }
        }
        state.view(date)
    }

    /// Pull a window of days into the cache: the remote range when signed in,
    /// otherwise whatever the local backup holds for it.
    pub async fn load_range(&self, start: NaiveDate, end: NaiveDate) -> RemoteResult<RecordReport> {
        if self.inner.remote.is_some() && self.user_id().await.is_some() {
            let (remote, user_id) = self.signed_in().await?;
            let result = remote.get_range(&user_id, start, end).await;
            let mut state = self.inner.state.lock().await;
            return match result {
                Ok(raws) if state.user_id.as_deref() == Some(user_id.as_str()) => {
                    Ok(self.merge_batch(&mut state, raws, Origin::Remote, "loadRange"))
                }
                Ok(_) => Ok(RecordReport::default()),
                Err(e) => {
                    state.record_error(DataError::new("loadRange", ErrorSource::Remote, e.to_string()));
                    Err(e)
                }
            };
        }

        let backup = &self.inner.backup;
        let entries: Vec<(NaiveDate, Value)> = backup
            .dates()
            .into_iter()
            .filter(|d| (start..=end).contains(d))
            .filter_map(|d| backup.load(d).map(|raw| (d, raw)))
            .collect();
        let mut state = self.inner.state.lock().await;
        Ok(self.merge_backup(&mut state, entries, "loadRange"))
    }

    // ---- mutations ----

    /// The single mutation entry point. The merged record is validated
    /// strictly; a rejected update leaves the cache untouched.
    pub async fn update_food_log(
        &self,
        date: NaiveDate,
        patch: &DailyLogPatch,
    ) -> Result<DailyLog, InvalidRecord> {
        let mut state = self.inner.state.lock().await;
        let existing = state.logs.get(&date).cloned();
        let stamp = next_stamp(existing.as_ref().map(|l| l.updated_at));
        let before = existing
            .clone()
            .unwrap_or_else(|| DailyLog::empty(date, state.user_id.clone(), stamp));

        let mut next = before.clone();
        next.apply(patch);
        if state.user_id.is_some() {
            next.user_id = state.user_id.clone();
        }
        next.updated_at = stamp;

        let log = match validate_record(next) {
            Ok(log) => log,
            Err(e) => {
                let data = serde_json::to_value(patch).unwrap_or(Value::Null);
                state.record_error(
                    DataError::new("updateFoodLog", ErrorSource::Validation, e.to_string())
                        .for_date(date_key(date))
                        .with_data(data),
                );
                return Err(e);
            }
        };

        match existing {
            None => state.audit(date, AuditAction::Create, AuditSource::User, None, None, None),
            Some(_) => {
                for change in changed_fields(&before, &log) {
                    state.audit(
                        date,
                        AuditAction::Update,
                        AuditSource::User,
                        Some(change.field),
                        Some(change.old_value),
                        Some(change.new_value),
                    );
                }
            }
        }

        state.put(log.clone());
        if !self.inner.backup.save(date, &log) {
            state.record_error(
                DataError::new("updateFoodLog", ErrorSource::Local, "local backup write failed")
                    .for_date(date_key(date)),
            );
        }
        self.mark_dirty(&mut state, date);
        Ok(log)
    }

    pub async fn update_meal(
        &self,
        date: NaiveDate,
        meal: MealType,
        patch: MealPatch,
    ) -> Result<DailyLog, InvalidRecord> {
        self.update_food_log(date, &DailyLogPatch::for_meal(meal, patch))
            .await
    }

    pub async fn update_snack(
        &self,
        date: NaiveDate,
        snack: SnackType,
        patch: SnackPatch,
    ) -> Result<DailyLog, InvalidRecord> {
        self.update_food_log(date, &DailyLogPatch::for_snack(snack, patch))
            .await
    }

    pub async fn update_health_metric(
        &self,
        date: NaiveDate,
        metric: HealthMetric,
        value: &Value,
    ) -> Result<DailyLog, InvalidRecord> {
        let patch = DailyLogPatch::for_metric(metric, value).map_err(InvalidRecord::single)?;
        self.update_food_log(date, &patch).await
    }

    /// Remove a day everywhere. The local removal stands even when the remote
    /// delete fails. Returns whether the day was cached.
    pub async fn delete_food_log(&self, date: NaiveDate) -> bool {
        let removed = {
            let mut state = self.inner.state.lock().await;
            self.inner.saves.cancel(&date);
            let removed = state.logs.remove(&date);
            state.sync.remove(&date);
            if let Some(uid) = removed.as_ref().and_then(|l| l.user_id.clone()) {
                state.deleted.insert((uid, date));
            }
            self.inner.backup.remove(date);
            if let Some(log) = &removed {
                let old = serde_json::to_value(log).ok();
                state.audit(date, AuditAction::Delete, AuditSource::User, None, old, None);
            }
            removed
        };

        let Some(log) = removed else { return false };
        if let (Some(remote), Some(id)) = (&self.inner.remote, log.id) {
            match remote.delete(id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {}
                Err(e) => {
                    let mut state = self.inner.state.lock().await;
                    state.record_error(
                        DataError::new("deleteFoodLog", ErrorSource::Remote, e.to_string())
                            .for_date(date_key(date))
                            .with_data(serde_json::to_value(&log).unwrap_or(Value::Null)),
                    );
                }
            }
        }
        true
    }

    // ---- recovery ----

    /// Sweep the whole local backup and merge every readable record.
    pub async fn recover_from_local_storage(&self) -> RecordReport {
        let backup = &self.inner.backup;
        let mut entries = Vec::new();
        let mut unreadable = Vec::new();
        for date in backup.dates() {
            match backup.load(date) {
                Some(raw) => entries.push((date, raw)),
                None => unreadable.push(date),
            }
        }

        let mut state = self.inner.state.lock().await;
        let mut report = self.merge_backup(&mut state, entries, "recoverFromLocalStorage");
        for date in unreadable {
            report.invalid += 1;
            report.errors.push(format!("{date}: backup entry is unreadable"));
        }
        tracing::info!(
            valid = report.valid,
            invalid = report.invalid,
            "Recovered food logs from local backup"
        );
        report
    }

    /// Strictly re-validate every cached record. Changes nothing.
    pub async fn validate_all_data(&self) -> RecordReport {
        let state = self.inner.state.lock().await;
        let mut report = RecordReport::default();
        for (date, log) in &state.logs {
            match validate_record(log.clone()) {
                Ok(_) => report.valid += 1,
                Err(e) => {
                    report.invalid += 1;
                    report.errors.extend(e.errors.iter().map(|msg| format!("{date}: {msg}")));
                }
            }
        }
        report
    }

    /// Push every day whose last remote save failed. Returns how many were retried.
    pub async fn retry_failed_saves(&self) -> usize {
        let failed: Vec<NaiveDate> = {
            let state = self.inner.state.lock().await;
            state
                .sync
                .iter()
                .filter(|(_, s)| **s == SyncStatus::Failed)
                .map(|(d, _)| *d)
                .collect()
        };
        for date in &failed {
            self.persist_remote(*date).await;
        }
        failed.len()
    }

    /// Run every pending debounced save now.
    pub async fn flush(&self) {
        let pending = self.inner.saves.take_all();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Flushing pending saves");
        }
        for date in pending {
            self.persist_remote(date).await;
        }
    }

    /// Mark every ledger entry resolved and clear the session error.
    pub async fn resolve_errors(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        state.error = None;
        let mut resolved = 0;
        for e in state.errors.iter_mut().filter(|e| !e.resolved) {
            e.resolved = true;
            resolved += 1;
        }
        resolved
    }

    pub async fn needs_recovery(&self) -> bool {
        self.inner.state.lock().await.needs_recovery()
    }

    pub async fn status(&self) -> StoreStatus {
        let state = self.inner.state.lock().await;
        StoreStatus {
            current_date: state.current_date,
            user_id: state.user_id.clone(),
            loading: !state.loading.is_empty(),
            saving: state.saving > 0,
            syncing: state.syncing,
            error: state.error.clone(),
            records: state.logs.len(),
            pending_saves: self.inner.saves.pending_count(),
            failed_saves: state.sync.values().filter(|s| **s == SyncStatus::Failed).count(),
            unresolved_errors: state.errors.iter().filter(|e| !e.resolved).count(),
            needs_recovery: state.needs_recovery(),
        }
    }

    /// Record the rewrites a migration sweep made to one day.
    pub async fn record_migration(&self, date: NaiveDate, changes: &[FieldMigration]) {
        let mut state = self.inner.state.lock().await;
        for change in changes {
            state.audit(
                date,
                AuditAction::Migrate,
                AuditSource::Migration,
                Some(change.field.clone()),
                Some(change.old_value.clone()),
                Some(change.new_value.clone()),
            );
        }
    }

    pub async fn audit_trail(&self) -> Vec<AuditEntry> {
        self.inner.state.lock().await.audit.to_vec()
    }

    pub async fn errors(&self) -> Vec<DataError> {
        self.inner.state.lock().await.errors.to_vec()
    }

    // ---- internals ----

    /// Merge externally sourced records. Invalid ones are logged with their
    /// data and counted, never surfaced as a hard failure.
    fn merge_batch(
        &self,
        state: &mut StoreState,
        raws: Vec<Value>,
        origin: Origin,
        operation: &str,
    ) -> RecordReport {
        let mut report = RecordReport::default();
        for raw in raws {
            self.merge_raw(state, raw, None, origin, operation, &mut report);
        }
        report
    }

    /// Merge backup entries read under their `foodLog_<date>` keys. Entries
    /// owned by another user are left alone; an entry whose body names a
    /// different day than its key counts as invalid.
    fn merge_backup(
        &self,
        state: &mut StoreState,
        entries: Vec<(NaiveDate, Value)>,
        operation: &str,
    ) -> RecordReport {
        let mut report = RecordReport::default();
        for (key_date, raw) in entries {
            if !owned_by(&raw, state.user_id.as_deref()) {
                tracing::debug!(date = %key_date, "Skipping backup entry owned by another user");
                continue;
            }
            self.merge_raw(state, raw, Some(key_date), Origin::Backup, operation, &mut report);
        }
        report
    }

    fn merge_raw(
        &self,
        state: &mut StoreState,
        raw: Value,
        key_date: Option<NaiveDate>,
        origin: Origin,
        operation: &str,
        report: &mut RecordReport,
    ) {
        let label = match key_date {
            Some(d) => date_key(d),
            None => raw
                .get("date")
                .and_then(Value::as_str)
                .unwrap_or("unknown date")
                .to_string(),
        };
        let result = validate_and_migrate(&raw).and_then(|migrated| match key_date {
            Some(d) if migrated.log.date != d => Err(InvalidRecord::single(format!(
                "date: stored under {} but dated {}",
                date_key(d),
                date_key(migrated.log.date)
            ))),
            _ => Ok(migrated),
        });
        match result {
            Ok(migrated) => {
                report.valid += 1;
                self.merge_one(state, migrated, origin);
            }
            Err(e) => {
                report.invalid += 1;
                report.errors.extend(e.errors.iter().map(|msg| format!("{label}: {msg}")));
                state.record_error(
                    DataError::new(operation, ErrorSource::Validation, e.to_string())
                        .for_date(label)
                        .with_data(raw),
                );
            }
        }
    }

    /// Last-writer-wins merge of one validated record. Returns whether it
    /// replaced the cached copy.
    fn merge_one(&self, state: &mut StoreState, migrated: Migrated, origin: Origin) -> bool {
        let Migrated { mut log, changes } = migrated;
        let date = log.date;

        if origin == Origin::Backup && log.user_id.is_none() {
            log.user_id = state.user_id.clone();
        }

        if let Some(current) = state.logs.get_mut(&date) {
            if current.updated_at > log.updated_at {
                return false;
            }
            if current.updated_at == log.updated_at {
                if origin == Origin::Remote {
                    current.id = log.id;
                    current.created_at = log.created_at;
                    state.sync.insert(date, SyncStatus::Synced);
                }
                return false;
            }
        }

        for change in changes {
            state.audit(
                date,
                AuditAction::Migrate,
                AuditSource::Migration,
                Some(change.field),
                Some(change.old_value),
                Some(change.new_value),
            );
        }

        self.inner.backup.save(date, &log);
        state.put(log);
        match origin {
            Origin::Remote => {
                self.inner.saves.cancel(&date);
                state.sync.insert(date, SyncStatus::Synced);
            }
            Origin::Backup => self.mark_dirty(state, date),
        }
        true
    }

    /// Queue a remote save when there is someone to save for.
    fn mark_dirty(&self, state: &mut StoreState, date: NaiveDate) {
        if state.user_id.is_some() && self.inner.remote.is_some() {
            state.sync.insert(date, SyncStatus::Pending);
            self.schedule_save(date);
        } else {
            state.sync.insert(date, SyncStatus::LocalOnly);
        }
    }

    fn schedule_save(&self, date: NaiveDate) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.saves.schedule(date, move || async move {
            if let Some(inner) = inner.upgrade() {
                FoodLogStore { inner }.persist_remote(date).await;
            }
        });
    }

    /// Upsert the cached copy of `date`. On a stale write the newer remote copy
    /// is pulled and wins; on any other failure the day is marked failed.
    async fn persist_remote(&self, date: NaiveDate) {
        let Some(remote) = self.inner.remote.clone() else { return };
        let log = {
            let mut state = self.inner.state.lock().await;
            let Some(log) = state.logs.get(&date).cloned() else { return };
            if log.user_id.is_none() || log.user_id != state.user_id {
                return;
            }
            state.saving += 1;
            log
        };

        let result = remote.upsert(&log).await;

        let mut state = self.inner.state.lock().await;
        state.saving -= 1;
        match result {
            Ok(saved) => {
                let owner = saved.user_id.clone().unwrap_or_default();
                if !state.logs.contains_key(&date) && state.deleted.remove(&(owner, date)) {
                    drop(state);
                    self.undo_deleted_save(remote.as_ref(), &saved).await;
                    return;
                }
                if let Some(current) = state.logs.get_mut(&date) {
                    if current.user_id != saved.user_id {
                        return;
                    }
                    current.id = saved.id;
                    current.created_at = saved.created_at;
                    let confirmed = current.updated_at == saved.updated_at;
                    let snapshot = current.clone();
                    self.inner.backup.save(date, &snapshot);
                    if confirmed {
                        state.sync.insert(date, SyncStatus::Synced);
                    }
                }
                let key = date_key(date);
                for e in state.errors.iter_mut() {
                    if !e.resolved && e.source == ErrorSource::Remote && e.date.as_deref() == Some(&key) {
                        e.resolved = true;
                    }
                }
                tracing::debug!(date = %date, "Saved food log remotely");
            }
            Err(RemoteError::Stale(_)) => {
                state.record_error(
                    DataError::new(
                        "saveFoodLog",
                        ErrorSource::Remote,
                        "a newer copy exists remotely; the local edit was superseded",
                    )
                    .for_date(date_key(date))
                    .with_data(serde_json::to_value(&log).unwrap_or(Value::Null)),
                );
                drop(state);
                self.reconcile_from_remote(remote.as_ref(), &log).await;
            }
            Err(e) => {
                tracing::error!(date = %date, error = %e, "Remote save failed");
                state.sync.insert(date, SyncStatus::Failed);
                state.error = Some(e.user_message());
                state.record_error(
                    DataError::new("saveFoodLog", ErrorSource::Remote, e.to_string())
                        .for_date(date_key(date))
                        .with_data(serde_json::to_value(&log).unwrap_or(Value::Null)),
                );
            }
        }
    }

    /// A save that landed after its day was deleted: remove the document it
    /// created so the day does not come back on the next sync.
    async fn undo_deleted_save(&self, remote: &dyn RemoteStore, saved: &DailyLog) {
        let Some(id) = saved.id else { return };
        let date = saved.date;
        tracing::info!(date = %date, "Removing save that raced a delete");
        match remote.delete(id).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => {
                let mut state = self.inner.state.lock().await;
                state.record_error(
                    DataError::new("deleteFoodLog", ErrorSource::Remote, e.to_string())
                        .for_date(date_key(date))
                        .with_data(serde_json::to_value(saved).unwrap_or(Value::Null)),
                );
            }
        }
    }

    async fn reconcile_from_remote(&self, remote: &dyn RemoteStore, log: &DailyLog) {
        let Some(user_id) = log.user_id.as_deref() else { return };
        let date = log.date;
        let fetched = remote.get_by_date(user_id, date).await;

        let mut state = self.inner.state.lock().await;
        match fetched {
            Ok(Some(raw)) => {
                let mut report =
                    self.merge_batch(&mut state, vec![raw], Origin::Remote, "saveFoodLog");
                if report.invalid > 0 {
                    state.sync.insert(date, SyncStatus::Failed);
                    report.errors.truncate(3);
                    tracing::error!(date = %date, errors = ?report.errors, "Newer remote copy is invalid");
                }
            }
            Ok(None) => {
                // Vanished between the write and the re-read: try again later.
                state.sync.insert(date, SyncStatus::Failed);
            }
            Err(e) => {
                state.sync.insert(date, SyncStatus::Failed);
                state.record_error(
                    DataError::new("saveFoodLog", ErrorSource::Remote, e.to_string())
                        .for_date(date_key(date)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStorage, MemoryRemoteStore, MemoryStorage};
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn settings() -> StoreSettings {
        StoreSettings {
            save_debounce: Duration::from_millis(1000),
            ..StoreSettings::default()
        }
    }

    struct Harness {
        store: FoodLogStore,
        storage: Arc<MemoryStorage>,
        remote: Arc<MemoryRemoteStore>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let store = FoodLogStore::new(
            LocalBackup::new(storage.clone()),
            Some(remote.clone() as Arc<dyn RemoteStore>),
            settings(),
        );
        Harness { store, storage, remote }
    }

    fn eggs() -> MealPatch {
        MealPatch {
            time: Some("7:30 AM".into()),
            meat_dairy: Some("eggs".into()),
            vegetables_fruits: Some("berries".into()),
            ..MealPatch::default()
        }
    }

    #[tokio::test]
    async fn test_meal_update_end_to_end() {
        let h = harness();
        h.store.set_user_id(Some("u1".into())).await.unwrap();

        let empty = h.store.load_food_log(day(1)).await.unwrap();
        assert!(empty.log.is_empty_day());
        let before = empty.log.updated_at;

        let log = h.store.update_meal(day(1), MealType::Breakfast, eggs()).await.unwrap();
        assert_eq!(log.breakfast.meat_dairy, "eggs");
        assert!(log.updated_at > before);

        let backed_up = h.storage.get_item("foodLog_2024-03-01").unwrap().unwrap();
        let backed_up: DailyLog = serde_json::from_str(&backed_up).unwrap();
        assert_eq!(backed_up.breakfast.meat_dairy, "eggs");

        assert_eq!(h.store.get(day(1)).await.unwrap().sync_status, SyncStatus::Pending);
        h.store.flush().await;
        assert_eq!(h.remote.upsert_count(), 1);
        let stored = h.remote.raw("u1", day(1)).await.unwrap();
        assert_eq!(stored["breakfast"]["meatDairy"], "eggs");

        let view = h.store.get(day(1)).await.unwrap();
        assert_eq!(view.sync_status, SyncStatus::Synced);
        assert!(view.log.id.is_some());
        assert_eq!(h.store.status().await.records, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_saves_once() {
        let h = harness();
        h.store.set_user_id(Some("u1".into())).await.unwrap();

        for text in ["e", "eg", "egg", "eggs"] {
            let patch = MealPatch {
                meat_dairy: Some(text.into()),
                ..MealPatch::default()
            };
            h.store.update_meal(day(1), MealType::Breakfast, patch).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(h.remote.upsert_count(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.remote.upsert_count(), 1);
        let stored = h.remote.raw("u1", day(1)).await.unwrap();
        assert_eq!(stored["breakfast"]["meatDairy"], "eggs");
    }

    #[tokio::test]
    async fn test_recover_migrates_legacy_backup() {
        let h = harness();
        let backup = h.store.backup();
        backup.save_raw(day(1), &json!({ "date": "2024-03-01", "sleepQuality": 4 }));
        backup.save_raw(day(2), &json!({ "date": "2024-03-02", "exercise": "walk" }));
        backup.save_raw(day(3), &json!({ "date": "2024-03-03", "notes": "ok" }));

        let report = h.store.recover_from_local_storage().await;
        assert_eq!(report.valid, 3);
        assert_eq!(report.invalid, 0);

        assert_eq!(h.store.status().await.records, 3);
        let legacy = h.store.get(day(1)).await.unwrap();
        assert_eq!(legacy.log.sleep_quality, 80);
        assert_eq!(legacy.sync_status, SyncStatus::LocalOnly);

        let trail = h.store.audit_trail().await;
        assert!(trail.iter().any(|e| e.action == AuditAction::Migrate
            && e.field.as_deref() == Some("sleepQuality")));
    }

    #[tokio::test]
    async fn test_recover_counts_invalid_records() {
        let h = harness();
        h.store.backup().save_raw(day(1), &json!({ "date": "2024-03-01" }));
        h.store.backup().save_raw(day(2), &json!({ "date": "2024-03-02", "sleepQuality": 140 }));

        let report = h.store.recover_from_local_storage().await;
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 1);
        assert!(report.errors[0].starts_with("2024-03-02: sleepQuality"));
        assert_eq!(h.store.errors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_one_record() {
        let h = harness();
        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = h.store.clone();
            tasks.push(tokio::spawn(async move {
                let patch = DailyLogPatch {
                    exercise: Some(format!("set {i}")),
                    ..DailyLogPatch::default()
                };
                store.update_food_log(day(1), &patch).await.unwrap()
            }));
        }
        let mut latest = None;
        for task in tasks {
            let log = task.await.unwrap();
            latest = latest.max(Some(log.updated_at));
        }

        assert_eq!(h.store.status().await.records, 1);
        let cached = h.store.get(day(1)).await.unwrap().log;
        assert_eq!(Some(cached.updated_at), latest);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let h = harness();
        h.store
            .update_health_metric(day(1), HealthMetric::SleepQuality, &json!(70))
            .await
            .unwrap();

        let err = h
            .store
            .update_health_metric(day(1), HealthMetric::SleepQuality, &json!(3))
            .await
            .unwrap_err();
        assert!(err.errors[0].starts_with("sleepQuality"));

        let err = h
            .store
            .update_health_metric(day(1), HealthMetric::Notes, &json!("<script>x</script>"))
            .await
            .unwrap_err();
        assert!(err.errors[0].starts_with("notes"));

        assert_eq!(h.store.get(day(1)).await.unwrap().log.sleep_quality, 70);
        let errors = h.store.errors().await;
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.source == ErrorSource::Validation));
        assert!(!h.store.needs_recovery().await);
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_commit() {
        let h = harness();
        h.store.set_user_id(Some("u1".into())).await.unwrap();
        h.remote
            .set_failure(Some(RemoteError::Network("offline".into())))
            .await;

        h.store.update_meal(day(1), MealType::Breakfast, eggs()).await.unwrap();
        h.store.flush().await;

        let view = h.store.get(day(1)).await.unwrap();
        assert_eq!(view.log.breakfast.meat_dairy, "eggs");
        assert_eq!(view.sync_status, SyncStatus::Failed);
        assert!(h.store.needs_recovery().await);
        let errors = h.store.errors().await;
        assert_eq!(errors[0].operation, "saveFoodLog");
        assert!(errors[0].data.is_some());

        h.remote.set_failure(None).await;
        assert_eq!(h.store.retry_failed_saves().await, 1);
        assert_eq!(h.store.get(day(1)).await.unwrap().sync_status, SyncStatus::Synced);
        assert!(h.store.errors().await.iter().all(|e| e.resolved));
        assert!(!h.store.needs_recovery().await);
    }

    #[tokio::test]
    async fn test_sign_in_sync_is_additive() {
        let h = harness();
        h.remote
            .insert_raw(
                "u1",
                day(1),
                json!({
                    "date": "2024-03-01",
                    "sleepQuality": 5,
                    "createdAt": "2024-03-01T08:00:00Z",
                    "updatedAt": "2024-03-01T08:00:00Z"
                }),
            )
            .await;
        h.remote
            .insert_raw("u1", day(2), json!({ "date": "2024-03-02", "sleepQuality": 900 }))
            .await;

        h.store
            .update_health_metric(day(5), HealthMetric::Exercise, &json!("swim"))
            .await
            .unwrap();

        let report = h.store.set_user_id(Some("u1".into())).await.unwrap();
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 1);

        assert_eq!(h.store.get(day(1)).await.unwrap().log.sleep_quality, 100);
        assert_eq!(h.store.get(day(1)).await.unwrap().sync_status, SyncStatus::Synced);
        let local = h.store.get(day(5)).await.unwrap();
        assert_eq!(local.log.exercise, "swim");
        assert_eq!(local.log.user_id.as_deref(), Some("u1"));
        assert_eq!(local.sync_status, SyncStatus::Pending);

        h.store.flush().await;
        assert!(h.remote.raw("u1", day(5)).await.is_some());
    }

    #[tokio::test]
    async fn test_sign_out_clears_cache() {
        let h = harness();
        h.store.set_user_id(Some("u1".into())).await.unwrap();
        h.store.update_meal(day(1), MealType::Lunch, eggs()).await.unwrap();

        h.store.set_user_id(None).await.unwrap();
        assert_eq!(h.remote.upsert_count(), 1);
        assert_eq!(h.store.status().await.records, 0);
        assert!(h.store.get(day(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_load_prefers_remote_then_backup() {
        let h = harness();
        h.store.backup().save_raw(day(1), &json!({ "date": "2024-03-01", "exercise": "backup" }));
        h.store.backup().save_raw(day(2), &json!({ "date": "2024-03-02", "exercise": "backup" }));
        h.remote
            .insert_raw("u1", day(1), json!({ "date": "2024-03-01", "exercise": "remote" }))
            .await;
        h.store.set_user_id(Some("u1".into())).await.unwrap();

        let first = h.store.load_food_log(day(1)).await.unwrap();
        assert_eq!(first.log.exercise, "remote");
        let second = h.store.load_food_log(day(2)).await.unwrap();
        assert_eq!(second.log.exercise, "backup");
        assert_eq!(second.sync_status, SyncStatus::Pending);
        let third = h.store.load_food_log(day(3)).await.unwrap();
        assert!(third.log.is_empty_day());
    }

    #[tokio::test]
    async fn test_load_salvages_invalid_record() {
        let h = harness();
        h.store.backup().save_raw(
            day(1),
            &json!({
                "date": "2024-03-01",
                "exercise": "run",
                "breakfast": { "time": "7:30 AM", "waterIntake": "500 l" }
            }),
        );

        let view = h.store.load_food_log(day(1)).await.unwrap();
        assert_eq!(view.log.exercise, "run");
        assert!(view.log.notes.contains("[recovered]"));
        assert!(h.store.needs_recovery().await);
    }

    #[tokio::test]
    async fn test_stale_write_adopts_newer_remote_copy() {
        let h = harness();
        h.store.set_user_id(Some("u1".into())).await.unwrap();
        h.store.update_meal(day(1), MealType::Breakfast, eggs()).await.unwrap();

        h.remote
            .insert_raw(
                "u1",
                day(1),
                json!({
                    "date": "2024-03-01",
                    "exercise": "other device",
                    "createdAt": "2024-03-01T08:00:00Z",
                    "updatedAt": "2999-01-01T00:00:00Z"
                }),
            )
            .await;
        h.store.flush().await;

        let view = h.store.get(day(1)).await.unwrap();
        assert_eq!(view.log.exercise, "other device");
        assert_eq!(view.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let h = harness();
        h.store.set_user_id(Some("u1".into())).await.unwrap();
        h.store.update_meal(day(1), MealType::Dinner, eggs()).await.unwrap();
        h.store.flush().await;
        assert_eq!(h.remote.len().await, 1);

        assert!(h.store.delete_food_log(day(1)).await);
        assert!(h.store.get(day(1)).await.is_none());
        assert!(h.store.backup().load(day(1)).is_none());
        assert_eq!(h.remote.len().await, 0);
        assert!(!h.store.delete_food_log(day(1)).await);
    }

    #[tokio::test]
    async fn test_validate_all_and_resolve() {
        let h = harness();
        h.store.update_meal(day(1), MealType::Breakfast, eggs()).await.unwrap();
        let report = h.store.validate_all_data().await;
        assert_eq!(report, RecordReport { valid: 1, invalid: 0, errors: vec![] });

        h.store.backup().save_raw(day(2), &json!({ "date": "2024-03-02", "sleepQuality": 140 }));
        h.store.load_food_log(day(2)).await.unwrap();
        assert!(h.store.needs_recovery().await);
        assert!(h.store.resolve_errors().await >= 1);
        assert!(!h.store.needs_recovery().await);
    }

    #[tokio::test]
    async fn test_backup_of_another_user_stays_private() {
        let h = harness();
        h.store.set_user_id(Some("alice".into())).await.unwrap();
        let patch = DailyLogPatch {
            notes: Some("alice private note".into()),
            ..DailyLogPatch::default()
        };
        h.store.update_food_log(day(1), &patch).await.unwrap();
        h.store.set_user_id(None).await.unwrap();
        h.store.set_user_id(Some("bob".into())).await.unwrap();

        let view = h.store.load_food_log(day(1)).await.unwrap();
        assert!(view.log.notes.is_empty());
        assert_eq!(view.log.user_id.as_deref(), Some("bob"));
        h.store.flush().await;
        assert!(h.remote.raw("bob", day(1)).await.is_none());

        let report = h.store.recover_from_local_storage().await;
        assert_eq!(report.valid, 0);
        assert!(h.store.get(day(1)).await.unwrap().log.notes.is_empty());
        assert_eq!(
            h.remote.raw("alice", day(1)).await.unwrap()["notes"],
            "alice private note"
        );
    }

    #[tokio::test]
    async fn test_recover_rejects_backup_filed_under_another_day() {
        let h = harness();
        h.store
            .backup()
            .save_raw(day(1), &json!({ "date": "2024-03-05", "exercise": "walk" }));

        let report = h.store.recover_from_local_storage().await;
        assert_eq!(report.valid, 0);
        assert_eq!(report.invalid, 1);
        assert!(report.errors[0].starts_with("2024-03-01: date:"));
        assert!(h.store.get(day(5)).await.is_none());
        assert!(h.store.get(day(1)).await.is_none());
    }

    /// Remote whose upserts wait until released.
    struct GatedRemote {
        inner: MemoryRemoteStore,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl RemoteStore for GatedRemote {
        async fn get_by_date(&self, user_id: &str, date: NaiveDate) -> RemoteResult<Option<Value>> {
            self.inner.get_by_date(user_id, date).await
        }

        async fn get_range(
            &self,
            user_id: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> RemoteResult<Vec<Value>> {
            self.inner.get_range(user_id, start, end).await
        }

        async fn get_recent(&self, user_id: &str, limit: usize) -> RemoteResult<Vec<Value>> {
            self.inner.get_recent(user_id, limit).await
        }

        async fn get_all(&self, user_id: &str) -> RemoteResult<Vec<Value>> {
            self.inner.get_all(user_id).await
        }

        async fn upsert(&self, log: &DailyLog) -> RemoteResult<DailyLog> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.upsert(log).await
        }

        async fn delete(&self, id: uuid::Uuid) -> RemoteResult<()> {
            self.inner.delete(id).await
        }

        async fn ping(&self) -> RemoteResult<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_delete_during_first_save_stays_deleted() {
        let remote = Arc::new(GatedRemote {
            inner: MemoryRemoteStore::new(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let store = FoodLogStore::new(
            LocalBackup::in_memory(),
            Some(remote.clone() as Arc<dyn RemoteStore>),
            settings(),
        );
        store.set_user_id(Some("u1".into())).await.unwrap();
        store.update_meal(day(1), MealType::Breakfast, eggs()).await.unwrap();

        let saving = tokio::spawn({
            let store = store.clone();
            async move { store.flush().await }
        });
        remote.entered.notified().await;
        assert!(store.delete_food_log(day(1)).await);
        remote.release.notify_one();
        saving.await.unwrap();

        assert_eq!(remote.inner.len().await, 0);
        assert_eq!(store.sync_all_data().await.unwrap().valid, 0);
        assert!(store.get(day(1)).await.is_none());
    }
}
