/// 扫描去重表：按原始凭证串记录最近一次放行时间。
///
/// 窗口为 0 表示不去重（入口车道的消息总线每次物理扫描只投递一次）。
/// 仅在放行时刷新 last_seen；窗口内的重复扫描被抑制且不刷新，
/// 避免持续对着摄像头的同一张码把窗口无限延长。
pub struct ScanDebounce {
    window_ms: u64,
    max_len: usize,
    entries: Vec<ScanSeen>,
}

struct ScanSeen {
    raw: String,
    last_seen_ms: u64,
}

impl ScanDebounce {
    pub fn new(window_ms: u64, max_len: usize) -> Self {
        Self {
            window_ms,
            max_len,
            entries: Vec::new(),
        }
    }

    /// 是否放行本次扫描；放行时刷新该凭证的 last_seen。
    pub fn allow(&mut self, raw: &str, now_ms: u64) -> bool {
        if self.window_ms == 0 {
            return true;
        }
        self.purge_expired(now_ms);

        if let Some(entry) = self.entries.iter_mut().find(|e| e.raw == raw) {
            if now_ms.saturating_sub(entry.last_seen_ms) < self.window_ms {
                return false;
            }
            entry.last_seen_ms = now_ms;
            return true;
        }

        if self.entries.len() >= self.max_len {
            self.drop_oldest();
        }
        self.entries.push(ScanSeen {
            raw: raw.to_string(),
            last_seen_ms: now_ms,
        });
        true
    }

    fn purge_expired(&mut self, now_ms: u64) {
        let window = self.window_ms;
        self.entries
            .retain(|e| now_ms.saturating_sub(e.last_seen_ms) < window);
    }

    fn drop_oldest(&mut self) {
        if let Some((idx, _)) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_seen_ms)
        {
            self.entries.swap_remove(idx);
        }
    }
}
