//! 工作台状态与本地状态的映射
//!
//! 工作台中的状态名是西班牙语显示名，匹配时忽略首尾空白与大小写

use crate::models::RedemptionStatus;

/// 兑换状态显示名 ↔ 本地状态
const REDEMPTION_STATUS_NAMES: [(&str, RedemptionStatus); 6] = [
    ("Pendiente Entrega", RedemptionStatus::PendingDelivery),
    ("En Proceso", RedemptionStatus::InQueue),
    ("Agendado", RedemptionStatus::Scheduled),
    ("Entregado", RedemptionStatus::Delivered),
    ("Completado", RedemptionStatus::Completed),
    ("Cancelado", RedemptionStatus::Cancelled),
];

/// 工单完成状态
pub const TICKET_DONE: &str = "Completado";

/// 权益工单已使用状态
pub const BENEFIT_USED: &str = "Usado";

/// 权益工单新建时的状态
pub const BENEFIT_PENDING: &str = "Pendiente";

fn same_label(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// 显示名 → 兑换状态；未映射返回 None
pub fn redemption_status_from_label(label: &str) -> Option<RedemptionStatus> {
    REDEMPTION_STATUS_NAMES
        .iter()
        .find(|(name, _)| same_label(name, label))
        .map(|(_, status)| *status)
}

/// 兑换状态 → 显示名（出站同步使用）
pub fn redemption_status_label(status: RedemptionStatus) -> &'static str {
    REDEMPTION_STATUS_NAMES
        .iter()
        .find(|(_, s)| *s == status)
        .map(|(name, _)| *name)
        .unwrap_or("Pendiente Entrega")
}

pub fn is_ticket_done(label: &str) -> bool {
    same_label(label, TICKET_DONE)
}

pub fn is_benefit_used(label: &str) -> bool {
    same_label(label, BENEFIT_USED)
}

/// 按工单金额计算积分：round(total * percent / 100)
///
/// 金额非正或结果为 0 时不发放
pub fn points_for_revenue(total: f64, percent: f64) -> Option<i64> {
    if !total.is_finite() || total <= 0.0 {
        return None;
    }
    let points = (total * percent / 100.0).round() as i64;
    if points > 0 { Some(points) } else { None }
}
