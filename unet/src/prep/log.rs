use std::time::Duration;

/// 累计计时器，用于统计批处理中各文件的耗时。各段时长在工作线程中测得后经`add`汇总。
#[derive(Clone, Debug, Default)]
pub struct AccTimer {
    consumed: Duration,
    laps: u32,
}

impl AccTimer {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计一段时长。
    #[inline]
    pub fn add(&mut self, lap: Duration) {
        self.consumed += lap;
        self.laps += 1;
    }

    #[inline]
    pub fn laps(&self) -> u32 {
        self.laps
    }

    #[inline]
    pub fn total(&self) -> Duration {
        self.consumed
    }

    /// 累计时间（毫秒）。
    #[inline]
    pub fn get_total_ms(&self) -> u64 {
        self.consumed.as_millis() as u64
    }

    /// 每段平均时长；尚无计时段时为`None`。
    #[inline]
    pub fn mean(&self) -> Option<Duration> {
        (self.laps != 0).then(|| self.consumed / self.laps)
    }
}
