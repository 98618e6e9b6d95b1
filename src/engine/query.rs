use crate::engine::lru_cache::*;
use crate::engine::rate_limiter::*;
use crate::engine::sync::*;
use crate::shared::dns;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::net::{IpAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::{cmp, fs, io, thread, time};

/// The engine parameters passed to the [`QueryEngine`] constructor.
/// A good default configuration is provided via the [`Default`] trait.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub max_cached_queries: Option<usize>,
    pub max_concurrent_requests: usize,
    pub max_requests_per_nameserver_second: usize,
    pub max_requests_per_tld_nameserver_second: usize,
    pub request_timeout: time::Duration,
    pub timeout_multiplier: f64,
    pub max_timeout: time::Duration,
    pub request_retries: usize,
    pub ipv4_only: bool,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            max_cached_queries: Some(4096),
            max_concurrent_requests: 96,
            max_requests_per_nameserver_second: 10,
            max_requests_per_tld_nameserver_second: 100,
            request_timeout: time::Duration::new(2, 0),
            timeout_multiplier: 2.0,
            max_timeout: time::Duration::new(16, 0),
            request_retries: 2,
            ipv4_only: false,
        }
    }
}

/// The per-type response codes of one multi-type query. One entry is
/// recorded per record type attempted; the `timeout` marker replaces
/// them all when any attempt timed out or the nameserver was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rcodes {
    pub timeout: bool,
    codes: BTreeMap<&'static str, u8>,
}

impl Rcodes {
    pub fn timed_out() -> Self {
        Self { timeout: true, codes: BTreeMap::new() }
    }

    pub fn record(&mut self, record_type: dns::RecordType, rcode: u8) {
        self.codes.insert(record_type.mnemonic(), rcode);
    }

    pub fn code_for(&self, record_type: dns::RecordType) -> Option<u8> {
        self.codes.get(record_type.mnemonic()).copied()
    }

    /// Reports if the query outcome was a definite NXDOMAIN: no timeout
    /// and the NS attempt answered with code 3.
    pub fn is_nxdomain(&self) -> bool {
        !self.timeout && self.code_for(dns::RecordType::NS) == Some(dns::RespCode::NxDomain.to_num())
    }

    /// The json form used inside query summaries: one numeric entry per
    /// record type, plus `"timeout": true` when the marker is set.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (mnemonic, code) in &self.codes {
            map.insert(mnemonic.to_string(), serde_json::json!(code));
        }
        if self.timeout {
            map.insert("timeout".to_string(), serde_json::json!(true));
        }
        serde_json::Value::Object(map)
    }
}

/// The parsed outcome of one multi-type query against one nameserver.
/// `records` is the union of the answer, authority and additional
/// sections of all per-type responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub records: BTreeSet<dns::Record>,
    pub rcodes: Rcodes,
    pub domain: dns::Name,
    pub nameserver: IpAddr,
}

impl QueryResponse {
    /// The response shape every network-layer failure is translated to.
    pub fn timed_out(domain: &dns::Name, nameserver: IpAddr) -> Self {
        Self {
            records: BTreeSet::new(),
            rcodes: Rcodes::timed_out(),
            domain: domain.clone(),
            nameserver,
        }
    }
}

/// Requests-per-second counters maintained by the background sampler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RpsStats {
    pub min: Option<u64>,
    pub max: u64,
    pub avg: f64,
    pub windows: u64,
}

/// A snapshot of all counters of a [`QueryEngine`].
#[derive(Debug, Serialize)]
pub struct EngineStats {
    pub cache: LruCacheStats,
    pub requests_sent: u64,
    pub retried_requests: u64,
    pub blocked_nameservers: usize,
    pub requests_per_second: RpsStats,
    pub rate_limiters: BTreeMap<String, RateLimiterStats>,
}

#[derive(Default)]
struct Counters {
    requests_sent: u64,
    retried_requests: u64,
}

#[derive(Default)]
struct Sampler {
    running: bool,
    last_count: u64,
    handles: Vec<thread::JoinHandle<()>>,
}

enum RequestErr {
    Timeout,
    Refused,
    Blocked,
}

/// The engine performing concurrent dns queries on behalf of crawls. It
/// owns the response cache, the in-flight query table, the per-nameserver
/// rate limiters and the blocked-nameserver set, all shared across the
/// sequential crawls of one process. Failures never escape: every network
/// error becomes a timeout-shaped [`QueryResponse`].
pub struct QueryEngine {
    params: EngineParams,
    tld_nameserver_ips: HashSet<IpAddr>,
    semaphore: Semaphore,
    cache: Mutex<LruCache<String, Arc<QueryResponse>>>,
    in_flight: Mutex<HashMap<String, Arc<Latch<Arc<QueryResponse>>>>>,
    limiters: Mutex<HashMap<IpAddr, Arc<RateLimiter>>>,
    blocked: Mutex<HashSet<IpAddr>>,
    counters: Mutex<Counters>,
    sampler: Mutex<Sampler>,
    rps: Mutex<RpsStats>,
}

impl QueryEngine {
    /// Build and return a new [`QueryEngine`] with the provided parameters.
    /// `tld_nameserver_ips` hold the addresses granted the higher rate
    /// limit ceiling, usually loaded via [`load_tld_nameserver_ips`].
    pub fn new(params: EngineParams, tld_nameserver_ips: HashSet<IpAddr>) -> Self {
        Self {
            semaphore: Semaphore::new(params.max_concurrent_requests),
            cache: Mutex::new(LruCache::new(params.max_cached_queries)),
            in_flight: Mutex::new(HashMap::new()),
            limiters: Mutex::new(HashMap::new()),
            blocked: Mutex::new(HashSet::new()),
            counters: Mutex::new(Counters::default()),
            sampler: Mutex::new(Sampler::default()),
            rps: Mutex::new(RpsStats::default()),
            tld_nameserver_ips,
            params,
        }
    }

    /// Performs a multi-type dns query for `domain` against `nameserver`.
    /// Responses are cached and identical in-flight queries are coalesced
    /// into a single request cycle: duplicates wait for the first caller
    /// and receive the same parsed response.
    pub fn query(
        self: &Arc<Self>,
        domain: &dns::Name,
        nameserver: IpAddr,
        record_types: &[dns::RecordType],
    ) -> Arc<QueryResponse> {
        let key = cache_key(domain, nameserver, record_types);

        enum Role {
            Cached(Arc<QueryResponse>),
            Waiter(Arc<Latch<Arc<QueryResponse>>>),
            Leader(Arc<Latch<Arc<QueryResponse>>>),
        }

        // The cache lock is held while consulting the in-flight table, so
        // that a completing leader (which caches before unlisting itself)
        // cannot slip between our two checks. Lock order is always
        // cache -> in_flight.
        let role = {
            let mut cache = self.cache.lock().unwrap();
            match cache.get(&key) {
                Some(response) => Role::Cached(Arc::clone(response)),
                None => {
                    let mut in_flight = self.in_flight.lock().unwrap();
                    match in_flight.get(&key) {
                        Some(latch) => Role::Waiter(Arc::clone(latch)),
                        None => {
                            let latch = Arc::new(Latch::new());
                            in_flight.insert(key.clone(), Arc::clone(&latch));
                            Role::Leader(latch)
                        }
                    }
                }
            }
        };

        match role {
            Role::Cached(response) => response,
            Role::Waiter(latch) => latch.wait(),
            Role::Leader(latch) => {
                let response = Arc::new(self.dns_response(domain, nameserver, record_types));
                {
                    let mut cache = self.cache.lock().unwrap();
                    cache.set(key.clone(), Arc::clone(&response));
                    self.in_flight.lock().unwrap().remove(&key);
                }
                latch.set(Arc::clone(&response));
                response
            }
        }
    }

    /// Performs the underlying multi-type query: one concurrent udp
    /// request per record type, all routed through the nameserver's rate
    /// limiter. Skipped or partially timed out queries yield the timeout
    /// response shape.
    fn dns_response(
        self: &Arc<Self>,
        domain: &dns::Name,
        nameserver: IpAddr,
        record_types: &[dns::RecordType],
    ) -> QueryResponse {
        if self.is_blocked(nameserver) {
            return QueryResponse::timed_out(domain, nameserver);
        }
        if self.params.ipv4_only && nameserver.is_ipv6() {
            return QueryResponse::timed_out(domain, nameserver);
        }

        let limiter = self.limiter_for(nameserver);
        let results: Vec<Result<(u8, Vec<dns::Record>), RequestErr>> = thread::scope(|scope| {
            let handles: Vec<_> = record_types
                .iter()
                .map(|record_type| {
                    let limiter = &limiter;
                    scope.spawn(move || self.send_request(domain, *record_type, nameserver, limiter))
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let mut rcodes = Rcodes::default();
        let mut records = BTreeSet::new();
        for (record_type, result) in record_types.iter().zip(results) {
            match result {
                Ok((rcode, recs)) => {
                    rcodes.record(*record_type, rcode);
                    records.extend(recs);
                }
                Err(_) => return QueryResponse::timed_out(domain, nameserver),
            }
        }
        QueryResponse {
            records,
            rcodes,
            domain: domain.clone(),
            nameserver,
        }
    }

    /// Sends one udp request with retries. Every attempt goes through the
    /// per-nameserver rate limiter and the global concurrency semaphore,
    /// with an exponentially scaled timeout. Refusals block the nameserver
    /// immediately; so does exhausting the retry budget with timeouts.
    fn send_request(
        self: &Arc<Self>,
        domain: &dns::Name,
        record_type: dns::RecordType,
        nameserver: IpAddr,
        limiter: &Arc<RateLimiter>,
    ) -> Result<(u8, Vec<dns::Record>), RequestErr> {
        let mut retries = 0;
        loop {
            if self.is_blocked(nameserver) {
                return Err(RequestErr::Blocked);
            }
            let attempt = limiter.run(|| {
                let _permit = self.semaphore.acquire();
                if self.is_blocked(nameserver) {
                    return Err(RequestErr::Blocked);
                }
                let timeout = self.timeout_for_retry(retries);
                self.note_request_sent();
                send_udp(domain, record_type, nameserver, timeout)
            });
            match attempt {
                Ok(message) => {
                    let rcode = message.header.resp_code.to_num();
                    let mut records = message.answers;
                    records.extend(message.authorities);
                    records.extend(message.additionals);
                    return Ok((rcode, records));
                }
                Err(RequestErr::Blocked) => return Err(RequestErr::Blocked),
                Err(RequestErr::Refused) => {
                    self.block_nameserver(nameserver, limiter, "connection refused");
                    return Err(RequestErr::Refused);
                }
                Err(RequestErr::Timeout) => {
                    if retries >= self.params.request_retries {
                        self.block_nameserver(nameserver, limiter, "repeated timeouts");
                        return Err(RequestErr::Timeout);
                    }
                    retries += 1;
                    self.counters.lock().unwrap().retried_requests += 1;
                }
            }
        }
    }

    fn timeout_for_retry(&self, retries: usize) -> time::Duration {
        let scaled = self
            .params
            .request_timeout
            .mul_f64(self.params.timeout_multiplier.powi(retries as i32));
        cmp::min(scaled, self.params.max_timeout)
    }

    fn is_blocked(&self, nameserver: IpAddr) -> bool {
        self.blocked.lock().unwrap().contains(&nameserver)
    }

    // Permanently block a nameserver and wake everything queued on its
    // limiter; the woken requests observe the block and resolve to
    // timeout responses.
    fn block_nameserver(&self, nameserver: IpAddr, limiter: &Arc<RateLimiter>, reason: &str) {
        let newly_blocked = self.blocked.lock().unwrap().insert(nameserver);
        if newly_blocked {
            log::warn!("Blocking nameserver {}: {}.", nameserver, reason);
        }
        limiter.release_waiters();
    }

    // Fetch or create the rate limiter of a nameserver. Addresses in the
    // tld list get the higher bucket.
    fn limiter_for(&self, nameserver: IpAddr) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().unwrap();
        let limiter = limiters.entry(nameserver).or_insert_with(|| {
            let rate = if self.tld_nameserver_ips.contains(&nameserver) {
                self.params.max_requests_per_tld_nameserver_second
            } else {
                self.params.max_requests_per_nameserver_second
            };
            Arc::new(RateLimiter::new(rate, time::Duration::from_secs(1)))
        });
        Arc::clone(limiter)
    }

    // Count one sent request and make sure the rps sampler is running.
    fn note_request_sent(self: &Arc<Self>) {
        self.counters.lock().unwrap().requests_sent += 1;
        let mut sampler = self.sampler.lock().unwrap();
        if sampler.running {
            return;
        }
        sampler.running = true;
        let engine = Arc::clone(self);
        let handle = thread::spawn(move || engine.sample_rps());
        sampler.handles.push(handle);
    }

    // Sample the requests sent over 1-second windows while activity
    // continues; the sampler dies on the first idle window and is
    // restarted by the next request.
    fn sample_rps(self: Arc<Self>) {
        loop {
            thread::sleep(time::Duration::from_secs(1));
            let sent = self.counters.lock().unwrap().requests_sent;
            let mut sampler = self.sampler.lock().unwrap();
            let measured = sent - sampler.last_count;
            sampler.last_count = sent;

            let mut rps = self.rps.lock().unwrap();
            rps.max = rps.max.max(measured);
            rps.min = Some(rps.min.map_or(measured, |min| min.min(measured)));
            rps.avg = (rps.windows as f64 * rps.avg + measured as f64) / (rps.windows + 1) as f64;
            rps.windows += 1;

            if measured == 0 {
                sampler.running = false;
                return;
            }
        }
    }

    /// Returns a snapshot of all engine counters.
    pub fn stats(&self) -> EngineStats {
        let limiters = self.limiters.lock().unwrap();
        let rate_limiters = limiters
            .iter()
            .map(|(ip, limiter)| (ip.to_string(), limiter.stats()))
            .collect();
        let counters = self.counters.lock().unwrap();
        EngineStats {
            cache: self.cache.lock().unwrap().stats(),
            requests_sent: counters.requests_sent,
            retried_requests: counters.retried_requests,
            blocked_nameservers: self.blocked.lock().unwrap().len(),
            requests_per_second: self.rps.lock().unwrap().clone(),
            rate_limiters,
        }
    }

    /// Drains the engine: joins the rps sampler and every limiter reset
    /// timer. Errors are logged, never propagated. Called by the drivers
    /// once all crawls of the run are finished.
    pub fn shutdown(&self) {
        let handles = {
            let mut sampler = self.sampler.lock().unwrap();
            std::mem::take(&mut sampler.handles)
        };
        for handle in handles {
            if handle.join().is_err() {
                log::error!("The rps sampler exited with a panic.");
            }
        }
        let limiters: Vec<Arc<RateLimiter>> = self.limiters.lock().unwrap().values().cloned().collect();
        for limiter in limiters {
            limiter.drain();
        }
        log::info!("Query engine drained.");
    }
}

/// Load the list of tld nameserver addresses from a newline-delimited
/// file. Empty lines and lines starting with '#' are skipped; malformed
/// addresses are reported and ignored.
pub fn load_tld_nameserver_ips(path: &str) -> io::Result<HashSet<IpAddr>> {
    let content = fs::read_to_string(path)?;
    let mut ips = HashSet::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<IpAddr>() {
            Ok(ip) => {
                ips.insert(ip);
            }
            Err(_) => log::warn!("Skipping malformed tld nameserver address: '{}'.", line),
        }
    }
    Ok(ips)
}

// The canonical cache/coalescing key of a query.
fn cache_key(domain: &dns::Name, nameserver: IpAddr, record_types: &[dns::RecordType]) -> String {
    let mut mnemonics: Vec<&str> = record_types.iter().map(|rt| rt.mnemonic()).collect();
    mnemonics.sort_unstable();
    format!("{}|{}|{}", domain, nameserver, mnemonics.join(","))
}

// Encode and send one dns query over udp, wait for the matching response
// and decode it. All io and decoding failures map onto the small set of
// request errors the retry loop understands.
fn send_udp(
    domain: &dns::Name,
    record_type: dns::RecordType,
    nameserver: IpAddr,
    timeout: time::Duration,
) -> Result<dns::Message, RequestErr> {
    let mut header = dns::Header::default();
    header.questions_count = 1;
    let request = dns::Message {
        header,
        questions: vec![dns::Question {
            node: domain.clone(),
            record_type,
            class: dns::Class::IN,
        }],
        answers: vec![],
        authorities: vec![],
        additionals: vec![],
    };
    let request_bytes = request.encode_to_bytes();

    let bind_addr = if nameserver.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind_addr).map_err(io_to_request_err)?;
    socket.set_write_timeout(Some(timeout)).map_err(io_to_request_err)?;
    socket.set_read_timeout(Some(timeout)).map_err(io_to_request_err)?;
    socket.send_to(&request_bytes, (nameserver, 53)).map_err(io_to_request_err)?;

    let mut buffer = [0_u8; 512];
    let (n_recv, _) = socket.recv_from(&mut buffer).map_err(io_to_request_err)?;
    let response = match dns::Message::decode_from_bytes(&buffer[..n_recv]) {
        Ok(v) => v,
        Err(err) => {
            log::debug!("Discarding undecodable response from {}: {:?}.", nameserver, err);
            return Err(RequestErr::Timeout);
        }
    };
    if response.id() != request.id() {
        log::debug!(
            "Discarding response from {} with unexpected id: {} != {}.",
            nameserver,
            response.id(),
            request.id()
        );
        return Err(RequestErr::Timeout);
    }
    Ok(response)
}

fn io_to_request_err(err: io::Error) -> RequestErr {
    match err.kind() {
        ErrorKind::ConnectionRefused => RequestErr::Refused,
        ErrorKind::ConnectionReset => RequestErr::Refused,
        ErrorKind::TimedOut => RequestErr::Timeout,
        ErrorKind::WouldBlock => RequestErr::Timeout,
        _ => RequestErr::Timeout,
    }
}
