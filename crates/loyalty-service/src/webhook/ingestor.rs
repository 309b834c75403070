//! Webhook 事件处理
//!
//! ## 处理流程
//!
//! 1. 规范化载荷（回显校验请求 / 补全记录）
//! 2. 按父数据库选择效果：兑换状态、服务工单积分、联系人、权益使用
//! 3. 回执预检；效果与回执在同一事务内写入
//! 4. 结果统一为 success / skipped / error，HTTP 层始终返回 200

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use loyalty_shared::config::{WorkspaceConfig, WorkspaceFieldNames};
use loyalty_shared::observability::metrics;

use crate::error::{LoyaltyError, Result};
use crate::models::{EventReceipt, MovementKind, MovementRequest, RedemptionStatus};
use crate::repository::LoyaltyStore;
use crate::service::{GiftService, LedgerService, RedemptionService};
use crate::webhook::mapping;
use crate::webhook::normalizer::{Normalized, PayloadNormalizer, ResolvedRecord};
use crate::webhook::properties::PropertyReader;
use crate::workspace::canonical_id;

/// 处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Skipped,
    Error,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

/// 事件处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl IngestResult {
    pub fn success() -> Self {
        Self {
            status: IngestStatus::Success,
            reason: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Skipped,
            reason: Some(reason.into()),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Error,
            reason: Some(reason.into()),
        }
    }
}

/// handle 的输出：校验回显或处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookReply {
    Challenge(Value),
    Processed(IngestResult),
}

/// 事件效果类别（按父数据库区分）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    RedemptionStatus,
    TicketCompleted,
    ContactUpsert,
    BenefitUsage,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedemptionStatus => "redemption_status",
            Self::TicketCompleted => "ticket_completed",
            Self::ContactUpsert => "contact_upsert",
            Self::BenefitUsage => "benefit_usage",
        }
    }
}

/// 处理所需的配置
#[derive(Debug, Clone)]
pub struct IngestorSettings {
    pub source: String,
    pub revenue_points_percent: f64,
    pub redemptions_database_id: String,
    pub tickets_database_id: String,
    pub clients_database_id: String,
    pub benefits_database_id: String,
    pub fields: WorkspaceFieldNames,
}

impl IngestorSettings {
    pub fn new(workspace: &WorkspaceConfig, source: &str, revenue_points_percent: f64) -> Self {
        Self {
            source: source.to_string(),
            revenue_points_percent,
            redemptions_database_id: workspace.redemptions_database_id.clone(),
            tickets_database_id: workspace.tickets_database_id.clone(),
            clients_database_id: workspace.clients_database_id.clone(),
            benefits_database_id: workspace.benefits_database_id.clone(),
            fields: workspace.fields.clone(),
        }
    }

    fn effect_for(&self, database_id: &str) -> Option<Effect> {
        let db = canonical_id(database_id);
        [
            (&self.redemptions_database_id, Effect::RedemptionStatus),
            (&self.tickets_database_id, Effect::TicketCompleted),
            (&self.clients_database_id, Effect::ContactUpsert),
            (&self.benefits_database_id, Effect::BenefitUsage),
        ]
        .into_iter()
        .find(|(configured, _)| !configured.is_empty() && canonical_id(configured) == db)
        .map(|(_, effect)| effect)
    }
}

/// 单个效果的结论，Err 统一在 classify 中转换
enum Outcome {
    Applied,
    Skipped(String),
}

pub struct WebhookIngestor {
    normalizer: PayloadNormalizer,
    store: Arc<dyn LoyaltyStore>,
    ledger: Arc<LedgerService>,
    redemptions: Arc<RedemptionService>,
    gifts: Arc<GiftService>,
    settings: IngestorSettings,
}

impl WebhookIngestor {
    pub fn new(
        normalizer: PayloadNormalizer,
        store: Arc<dyn LoyaltyStore>,
        ledger: Arc<LedgerService>,
        redemptions: Arc<RedemptionService>,
        gifts: Arc<GiftService>,
        settings: IngestorSettings,
    ) -> Self {
        Self {
            normalizer,
            store,
            ledger,
            redemptions,
            gifts,
            settings,
        }
    }

    /// 处理一次推送，永不返回错误
    #[instrument(skip(self, raw))]
    pub async fn handle(&self, raw: &Value) -> WebhookReply {
        let record = match self.normalizer.normalize(raw).await {
            Ok(Normalized::Challenge(echo)) => {
                info!("收到订阅校验请求");
                return WebhookReply::Challenge(echo);
            }
            Ok(Normalized::Record(record)) => record,
            Ok(Normalized::Unrecognized(reason)) => {
                metrics::record_webhook_event("unknown", "skipped");
                return WebhookReply::Processed(IngestResult::skipped(reason));
            }
            Err(e) => {
                metrics::record_webhook_event("unknown", "error");
                error!(error = %e, "回源拉取记录失败");
                return WebhookReply::Processed(IngestResult::error(e.to_string()));
            }
        };

        WebhookReply::Processed(self.process(record).await)
    }

    async fn process(&self, record: ResolvedRecord) -> IngestResult {
        let page_id = record.page.id.clone();

        if record.page.archived {
            return IngestResult::skipped("记录已归档");
        }

        let Some(effect) = record
            .page
            .database_id()
            .and_then(|db| self.settings.effect_for(db))
        else {
            metrics::record_webhook_event("unknown", "skipped");
            return IngestResult::skipped("未订阅的数据库");
        };

        let outcome = match effect {
            Effect::RedemptionStatus => self.redemption_status(&record).await,
            Effect::TicketCompleted => self.ticket_completed(&record).await,
            Effect::ContactUpsert => self.contact_upsert(&record).await,
            Effect::BenefitUsage => self.benefit_usage(&record).await,
        };

        let result = classify(outcome);
        metrics::record_webhook_event(effect.as_str(), result.status.as_str());
        match result.status {
            IngestStatus::Success => {
                info!(page_id = %page_id, effect = effect.as_str(), "webhook 事件已处理")
            }
            IngestStatus::Skipped => info!(
                page_id = %page_id,
                effect = effect.as_str(),
                reason = result.reason.as_deref().unwrap_or_default(),
                "webhook 事件已跳过"
            ),
            IngestStatus::Error => error!(
                page_id = %page_id,
                effect = effect.as_str(),
                reason = result.reason.as_deref().unwrap_or_default(),
                "webhook 事件处理失败"
            ),
        }
        result
    }

    fn receipt(&self, record: &ResolvedRecord, event_type: String) -> EventReceipt {
        EventReceipt::new(&self.settings.source, &record.page.id, event_type)
    }

    async fn already_seen(&self, receipt: &EventReceipt) -> Result<bool> {
        self.store.receipt_exists(receipt).await
    }

    // ==================== 效果 ====================

    /// 兑换页状态变化 → 推进本地兑换状态
    async fn redemption_status(&self, record: &ResolvedRecord) -> Result<Outcome> {
        let fields = &self.settings.fields;
        let reader = PropertyReader::new(&record.page.properties);

        let Some(label) = reader.text(&fields.status) else {
            return Ok(Outcome::Skipped("缺少状态属性".to_string()));
        };
        let Some(status) = mapping::redemption_status_from_label(&label) else {
            return Ok(Outcome::Skipped(format!("未映射的状态: {label}")));
        };
        let Some(redemption_id) = reader.local_id(&fields.local_id) else {
            return Ok(Outcome::Skipped("记录未关联本地兑换".to_string()));
        };

        let current = self.redemptions.get_redemption(redemption_id).await?;
        if current.status == status {
            return Ok(Outcome::Skipped("状态未变化".to_string()));
        }

        let receipt = self.receipt(record, format!("redemption_status:{}", status.as_str()));
        if self.already_seen(&receipt).await? {
            return Err(receipt.duplicate_error());
        }

        if status == RedemptionStatus::Cancelled {
            self.redemptions
                .cancel_once(redemption_id, "Cancelado en workspace", receipt)
                .await?;
        } else {
            self.redemptions
                .update_status_once(redemption_id, status, receipt)
                .await?;
        }
        Ok(Outcome::Applied)
    }

    /// 服务工单完成 → 按金额发放积分（每张工单只发一次）
    async fn ticket_completed(&self, record: &ResolvedRecord) -> Result<Outcome> {
        let fields = &self.settings.fields;
        let reader = PropertyReader::new(&record.page.properties);

        match reader.text(&fields.status) {
            Some(label) if mapping::is_ticket_done(&label) => {}
            Some(label) => return Ok(Outcome::Skipped(format!("工单状态为 {label}"))),
            None => return Ok(Outcome::Skipped("缺少状态属性".to_string())),
        }

        let receipt = self.receipt(record, "ticket.completed".to_string());
        if self.already_seen(&receipt).await? {
            return Err(receipt.duplicate_error());
        }

        let Some(total) = reader.number(&fields.total_amount) else {
            return Ok(Outcome::Skipped("缺少工单金额".to_string()));
        };
        let Some(points) =
            mapping::points_for_revenue(total, self.settings.revenue_points_percent)
        else {
            return Ok(Outcome::Skipped(format!("金额 {total} 不足以产生积分")));
        };

        let client = match self.resolve_ticket_client(&reader).await? {
            Some(client) => client,
            None => {
                return Err(LoyaltyError::Integrity(format!(
                    "工单 {} 无法关联到本地客户",
                    record.page.id
                )));
            }
        };

        let title = reader.text(&fields.title).unwrap_or_else(|| record.page.id.clone());
        self.ledger
            .apply_movement_once(
                MovementRequest::new(
                    client.id,
                    points,
                    MovementKind::Earned,
                    format!("Servicio: {title}"),
                ),
                receipt,
            )
            .await?;
        Ok(Outcome::Applied)
    }

    /// 工单客户：先按关联的客户页，再按手机号
    async fn resolve_ticket_client(
        &self,
        reader: &PropertyReader<'_>,
    ) -> Result<Option<crate::models::Client>> {
        let fields = &self.settings.fields;
        for page_id in reader.relation_ids(&fields.client_relation) {
            if let Some(client) = self.store.find_client_by_workspace_page(&page_id).await? {
                return Ok(Some(client));
            }
        }
        match reader.phone(&fields.phone) {
            Some(phone) => self.store.find_client_by_phone(&phone).await,
            None => Ok(None),
        }
    }

    /// 联系人新建或更新 → 按手机号查找或创建客户并记录页面 ID
    async fn contact_upsert(&self, record: &ResolvedRecord) -> Result<Outcome> {
        let fields = &self.settings.fields;
        let reader = PropertyReader::new(&record.page.properties);

        let Some(phone) = reader.phone(&fields.phone) else {
            return Ok(Outcome::Skipped("联系人缺少手机号".to_string()));
        };

        let version = record
            .page
            .last_edited_time
            .clone()
            .unwrap_or_else(|| record.event_type.clone());
        let receipt = self.receipt(record, format!("contact_upserted:{version}"));
        if self.already_seen(&receipt).await? {
            return Err(receipt.duplicate_error());
        }

        let upsert = self
            .store
            .upsert_client_by_phone(
                &phone,
                reader.text(&fields.title),
                Some(record.page.id.clone()),
                Some(receipt),
            )
            .await?;

        if upsert.created {
            info!(client_id = upsert.client.id, "首次同步联系人，已创建客户");
        }
        Ok(Outcome::Applied)
    }

    /// 权益工单标记为已使用 → 本地权益 used
    async fn benefit_usage(&self, record: &ResolvedRecord) -> Result<Outcome> {
        let fields = &self.settings.fields;
        let reader = PropertyReader::new(&record.page.properties);

        match reader.text(&fields.status) {
            Some(label) if mapping::is_benefit_used(&label) => {}
            Some(label) => return Ok(Outcome::Skipped(format!("权益状态为 {label}"))),
            None => return Ok(Outcome::Skipped("缺少状态属性".to_string())),
        }
        let Some(benefit_id) = reader.local_id(&fields.local_id) else {
            return Ok(Outcome::Skipped("记录未关联本地权益".to_string()));
        };

        let receipt = self.receipt(record, "benefit.used".to_string());
        if self.already_seen(&receipt).await? {
            return Err(receipt.duplicate_error());
        }

        self.gifts.use_benefit_once(benefit_id, receipt).await?;
        Ok(Outcome::Applied)
    }
}

/// 错误分级：重复事件与业务/完整性错误跳过，系统错误报告 error
fn classify(outcome: Result<Outcome>) -> IngestResult {
    match outcome {
        Ok(Outcome::Applied) => IngestResult::success(),
        Ok(Outcome::Skipped(reason)) => IngestResult::skipped(reason),
        Err(LoyaltyError::DuplicateEvent { .. }) => IngestResult::skipped("重复事件"),
        Err(e @ LoyaltyError::Integrity(_)) => {
            warn!(error = %e, "webhook 数据完整性问题");
            IngestResult::skipped(e.to_string())
        }
        Err(e) if e.is_business_error() => IngestResult::skipped(e.to_string()),
        Err(e) => IngestResult::error(e.to_string()),
    }
}
