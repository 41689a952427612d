use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);
const SHARD_COUNT: usize = 16;

struct Bucket {
    window_start: Instant,
    used: u32,
}

/*
    Per-IP request accounting: each client gets a fresh allocation of
    tokens every 60 seconds and requests beyond it are refused until the
    window rolls over. The table is sharded by IP hash so one hot client
    never serializes the rest.
*/
pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<IpAddr, Bucket>>>,
    capacity: u32,
}

impl RateLimiter {
    pub fn new(capacity: u32) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            capacity,
        }
    }

    /// Takes one token for `ip`, returning whether the request may proceed.
    pub fn try_acquire(&self, ip: IpAddr) -> bool {
        self.try_acquire_at(ip, Instant::now())
    }

    fn try_acquire_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut shard = self.shard(ip).lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let bucket = shard.entry(ip).or_insert(Bucket {
            window_start: now,
            used: 0,
        });

        if now.duration_since(bucket.window_start) >= WINDOW {
            bucket.window_start = now;
            bucket.used = 0;
        }
        if bucket.used < self.capacity {
            bucket.used += 1;
            true
        } else {
            false
        }
    }

    fn shard(&self, ip: IpAddr) -> &Mutex<HashMap<IpAddr, Bucket>> {
        let mut hasher = DefaultHasher::new();
        ip.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    /// Number of client IPs with an open accounting window.
    pub fn tracked_clients(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len())
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn burst_over_capacity_is_limited() {
        let limiter = RateLimiter::new(60);
        let start = Instant::now();

        // 100 requests spread over 10 seconds
        let refused = (0..100)
            .filter(|i| {
                let at = start + Duration::from_millis(i * 100);
                !limiter.try_acquire_at(ip(1), at)
            })
            .count();
        assert_eq!(refused, 40);
    }

    #[test]
    fn window_rolls_over() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();

        assert!(limiter.try_acquire_at(ip(2), start));
        assert!(limiter.try_acquire_at(ip(2), start));
        assert!(!limiter.try_acquire_at(ip(2), start));
        assert!(limiter.try_acquire_at(ip(2), start + WINDOW));
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1);
        let now = Instant::now();
        assert!(limiter.try_acquire_at(ip(3), now));
        assert!(!limiter.try_acquire_at(ip(3), now));
        assert!(limiter.try_acquire_at(ip(4), now));
    }

    #[test]
    fn tracked_clients_counts_distinct_ips() {
        let limiter = RateLimiter::new(10);
        assert_eq!(limiter.tracked_clients(), 0);
        for last in 0..20 {
            limiter.try_acquire(ip(last));
            limiter.try_acquire(ip(last));
        }
        assert_eq!(limiter.tracked_clients(), 20);
    }
}
