//! 再接続スーパーバイザ
//!
//! 一時的な切断のあと、固定の待ち時間で `open()` を 1 回だけ予約する。
//! 回数上限もバックオフの増加もなく、無期限に再試行する。

/// 再接続タイマー
///
/// 予約は常に最大 1 つ。予約中に再度 `schedule` しても期限は変わらない。
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    /// 再接続までの待ち時間（ミリ秒）
    delay_ms: u64,
    /// 予約中の再接続時刻
    pending_at: Option<u64>,
    /// これまでに予約した回数（統計用）
    scheduled_total: u64,
}

impl ReconnectSupervisor {
    /// 新しいスーパーバイザを生成する
    pub fn new(delay_ms: u64) -> Self {
        ReconnectSupervisor {
            delay_ms,
            pending_at: None,
            scheduled_total: 0,
        }
    }

    /// 再接続を予約する
    ///
    /// # 戻り値
    /// 再接続を行う時刻（既に予約済みならその時刻）
    pub fn schedule(&mut self, now_ms: u64) -> u64 {
        if let Some(at) = self.pending_at {
            return at;
        }
        let at = now_ms.saturating_add(self.delay_ms);
        self.pending_at = Some(at);
        self.scheduled_total += 1;
        at
    }

    /// 予約を取り消す
    ///
    /// # 戻り値
    /// 取り消す予約があったか
    pub fn cancel(&mut self) -> bool {
        self.pending_at.take().is_some()
    }

    /// 期限が来ていれば予約を消費して `true` を返す
    pub fn take_due(&mut self, now_ms: u64) -> bool {
        match self.pending_at {
            Some(at) if now_ms >= at => {
                self.pending_at = None;
                true
            }
            _ => false,
        }
    }

    /// 予約中の再接続時刻
    pub fn deadline(&self) -> Option<u64> {
        self.pending_at
    }

    /// 予約中か
    pub fn is_pending(&self) -> bool {
        self.pending_at.is_some()
    }

    /// これまでに予約した回数
    pub fn scheduled_total(&self) -> u64 {
        self.scheduled_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_and_fire() {
        let mut supervisor = ReconnectSupervisor::new(2000);
        assert_eq!(supervisor.schedule(1000), 3000);

        assert!(!supervisor.take_due(2999));
        assert!(supervisor.take_due(3000));
        // 1 回だけ
        assert!(!supervisor.take_due(5000));
    }

    #[test]
    fn test_duplicate_schedule_keeps_single_timer() {
        let mut supervisor = ReconnectSupervisor::new(2000);
        supervisor.schedule(0);
        assert_eq!(supervisor.schedule(500), 2000);
        assert_eq!(supervisor.scheduled_total(), 1);
    }

    #[test]
    fn test_cancel() {
        let mut supervisor = ReconnectSupervisor::new(2000);
        supervisor.schedule(0);
        assert!(supervisor.cancel());
        assert!(!supervisor.is_pending());
        assert!(!supervisor.take_due(10_000));
        assert!(!supervisor.cancel());
    }

    #[test]
    fn test_reschedule_after_fire() {
        let mut supervisor = ReconnectSupervisor::new(100);
        supervisor.schedule(0);
        assert!(supervisor.take_due(100));
        assert_eq!(supervisor.schedule(150), 250);
        assert_eq!(supervisor.deadline(), Some(250));
        assert_eq!(supervisor.scheduled_total(), 2);
    }

    #[test]
    fn test_huge_delay_saturates() {
        let mut supervisor = ReconnectSupervisor::new(u64::MAX);
        assert_eq!(supervisor.schedule(1000), u64::MAX);
        assert!(!supervisor.take_due(u64::MAX - 1));
        assert!(supervisor.take_due(u64::MAX));
    }
}
