use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-IP token bucket guarding the REST surface.
pub struct RequestLimiter {
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
    burst: f64,
    per_sec: f64,
}

struct Bucket {
    tokens: f64,
    touched: Instant,
}

impl RequestLimiter {
    pub fn new(burst: f64, per_sec: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            burst,
            per_sec,
        }
    }

    /// Take one token for `ip`. Returns `false` when the bucket is dry.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: self.burst,
            touched: now,
        });

        let refill = now.duration_since(bucket.touched).as_secs_f64() * self.per_sec;
        bucket.tokens = (bucket.tokens + refill).min(self.burst);
        bucket.touched = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle for longer than `max_age`.
    pub fn prune(&self, max_age: Duration) {
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        buckets.retain(|_, b| now.duration_since(b.touched) < max_age);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}
