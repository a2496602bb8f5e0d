use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::CacheError;
use crate::models::interpolation::{DataTier, InterpolationModel};
use crate::models::radiation::Coordinate;

const SECS_PER_DAY: i64 = 86_400;
const KM_PER_DEG_LAT: f64 = 110.574;
const KM_PER_DEG_LON_EQUATOR: f64 = 111.320;
/// Distances closer than this are treated as equal when ranking candidates.
const DISTANCE_TIE_KM: f64 = 0.001;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persisted_locations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    latitude    REAL    NOT NULL,
    longitude   REAL    NOT NULL,
    model_json  TEXT    NOT NULL,
    data_tier   TEXT    NOT NULL,
    source      TEXT    NOT NULL,
    ttl_days    INTEGER NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_persisted_locations_created_at ON persisted_locations(created_at);
CREATE VIRTUAL TABLE IF NOT EXISTS persisted_locations_rtree USING rtree(
    id, min_lat, max_lat, min_lon, max_lon
);
";

#[derive(Debug, Clone)]
pub struct ProximityHit {
    pub id: i64,
    pub model: Arc<InterpolationModel>,
    pub distance_km: f64,
    pub data_tier: DataTier,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ProximityStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub by_tier: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
}

/// Durable store answering "is there a model near this point?".
#[async_trait]
pub trait ProximityCache: Send + Sync {
    async fn find_nearby(&self, coordinate: Coordinate, radius_km: f64) -> Result<Option<ProximityHit>, CacheError>;

    /// Inserts a new row; earlier rows for the same point are superseded, not updated.
    async fn save(&self, coordinate: Coordinate, model: &InterpolationModel) -> Result<i64, CacheError>;

    async fn purge_expired(&self) -> Result<usize, CacheError>;

    async fn stats(&self) -> Result<ProximityStats, CacheError>;
}

/// Unexpired row inside the search radius.
#[derive(Debug, Clone)]
struct Candidate {
    id: i64,
    distance_km: f64,
    data_tier: DataTier,
    source: String,
    created_at: i64,
    model_json: String,
}

/// Picks the row to serve.
///
/// Fresh rows (younger than `stale_after_secs`) shadow stale ones. Among the
/// remaining rows the nearest wins; near-equal distances go to the higher tier,
/// then to the most recent row.
fn select_candidate(candidates: &[Candidate], now: i64, stale_after_secs: i64) -> Option<&Candidate> {
    let is_fresh = |c: &Candidate| now - c.created_at < stale_after_secs;
    let any_fresh = candidates.iter().any(is_fresh);

    candidates
        .iter()
        .filter(|c| !any_fresh || is_fresh(c))
        .reduce(|best, c| {
            let closer = c.distance_km < best.distance_km - DISTANCE_TIE_KM;
            let tied = (c.distance_km - best.distance_km).abs() <= DISTANCE_TIE_KM;
            let better_tie = tied
                && (c.data_tier > best.data_tier
                    || (c.data_tier == best.data_tier && c.created_at > best.created_at));
            if closer || better_tie { c } else { best }
        })
}

/// SQLite proximity cache with an R*Tree point index.
pub struct SqliteProximityCache {
    conn: Arc<Mutex<Connection>>,
    ttl_days: u32,
    stale_after: Duration,
}

impl SqliteProximityCache {
    pub fn open(path: impl AsRef<Path>, ttl_days: u32, stale_after: Duration) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open(path)?;
            conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))?;
            conn
        };
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn, ttl_days, stale_after)
    }

    pub fn open_in_memory(ttl_days: u32, stale_after: Duration) -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?, ttl_days, stale_after)
    }

    fn with_connection(conn: Connection, ttl_days: u32, stale_after: Duration) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl_days,
            stale_after,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| CacheError::Unavailable("proximity cache connection poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| CacheError::Unavailable(format!("proximity cache task failed: {e}")))?
    }

    /// Inserts with an explicit creation time.
    pub async fn save_at(
        &self,
        coordinate: Coordinate,
        model: &InterpolationModel,
        created_at: DateTime<Utc>,
    ) -> Result<i64, CacheError> {
        let model_json = serde_json::to_string(model)?;
        let tier = model.data_tier().to_string();
        let source = model.source_provider_id().to_string();
        let ttl_days = self.ttl_days;
        let (lat, lon) = (coordinate.latitude(), coordinate.longitude());

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO persisted_locations
                    (latitude, longitude, model_json, data_tier, source, ttl_days, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![lat, lon, model_json, tier, source, ttl_days, created_at.timestamp()],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO persisted_locations_rtree (id, min_lat, max_lat, min_lon, max_lon)
                 VALUES (?1, ?2, ?2, ?3, ?3)",
                params![id, lat, lon],
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }
}

/// Bounding box around `center` that contains every point within `radius_km`.
fn search_box(center: Coordinate, radius_km: f64) -> (f64, f64, f64, f64) {
    let lat = center.latitude();
    let lon = center.longitude();
    let dlat = radius_km / KM_PER_DEG_LAT;
    let min_lat = (lat - dlat).max(-90.0);
    let max_lat = (lat + dlat).min(90.0);

    let widest_lat = min_lat.abs().max(max_lat.abs());
    let km_per_deg_lon = KM_PER_DEG_LON_EQUATOR * widest_lat.to_radians().cos();
    if km_per_deg_lon <= 1e-6 {
        return (min_lat, max_lat, -180.0, 180.0);
    }
    let dlon = radius_km / km_per_deg_lon;
    let (min_lon, max_lon) = (lon - dlon, lon + dlon);
    if min_lon < -180.0 || max_lon > 180.0 {
        // Crosses the antimeridian; the haversine pass filters the extra rows.
        return (min_lat, max_lat, -180.0, 180.0);
    }
    (min_lat, max_lat, min_lon, max_lon)
}

#[async_trait]
impl ProximityCache for SqliteProximityCache {
    async fn find_nearby(&self, coordinate: Coordinate, radius_km: f64) -> Result<Option<ProximityHit>, CacheError> {
        let (min_lat, max_lat, min_lon, max_lon) = search_box(coordinate, radius_km);
        let now = Utc::now().timestamp();
        let stale_after_secs = self.stale_after.as_secs() as i64;

        let chosen = self
            .with_conn(move |conn| {
                let mut candidates = Vec::new();
                {
                    let mut stmt = conn.prepare_cached(
                        "SELECT p.id, p.latitude, p.longitude, p.model_json, p.data_tier, p.source, p.created_at
                         FROM persisted_locations_rtree r
                         JOIN persisted_locations p ON p.id = r.id
                         WHERE r.max_lat >= ?1 AND r.min_lat <= ?2
                           AND r.max_lon >= ?3 AND r.min_lon <= ?4
                           AND p.created_at + p.ttl_days * ?5 > ?6",
                    )?;
                    let rows = stmt.query_map(
                        params![min_lat, max_lat, min_lon, max_lon, SECS_PER_DAY, now],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, f64>(1)?,
                                row.get::<_, f64>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, String>(5)?,
                                row.get::<_, i64>(6)?,
                            ))
                        },
                    )?;

                    for row in rows {
                        let (id, lat, lon, model_json, tier, source, created_at) = row?;
                        let Ok(point) = Coordinate::new(lat, lon) else {
                            continue;
                        };
                        let distance_km = coordinate.distance_km(&point);
                        if distance_km > radius_km {
                            continue;
                        }
                        let data_tier = tier.parse().unwrap_or(DataTier::Standard);
                        candidates.push(Candidate {
                            id,
                            distance_km,
                            data_tier,
                            source,
                            created_at,
                            model_json,
                        });
                    }
                }

                // An unreadable row must not hide valid neighbours: drop it and re-rank.
                while let Some(candidate) = select_candidate(&candidates, now, stale_after_secs) {
                    let id = candidate.id;
                    match serde_json::from_str::<InterpolationModel>(&candidate.model_json) {
                        Ok(model) => {
                            let candidate = candidate.clone();
                            return Ok(Some((candidate, model)));
                        }
                        Err(err) => {
                            tracing::warn!(id, error = %err, "discarding unreadable proximity cache row");
                            conn.execute("DELETE FROM persisted_locations_rtree WHERE id = ?1", params![id])?;
                            conn.execute("DELETE FROM persisted_locations WHERE id = ?1", params![id])?;
                            candidates.retain(|c| c.id != id);
                        }
                    }
                }
                Ok(None)
            })
            .await?;

        let Some((candidate, model)) = chosen else {
            return Ok(None);
        };
        Ok(Some(ProximityHit {
            id: candidate.id,
            model: Arc::new(model),
            distance_km: candidate.distance_km,
            data_tier: candidate.data_tier,
            source: candidate.source,
            created_at: DateTime::from_timestamp(candidate.created_at, 0).unwrap_or_else(Utc::now),
        }))
    }

    async fn save(&self, coordinate: Coordinate, model: &InterpolationModel) -> Result<i64, CacheError> {
        self.save_at(coordinate, model, Utc::now()).await
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now().timestamp();
        let removed = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM persisted_locations_rtree WHERE id IN (
                        SELECT id FROM persisted_locations WHERE created_at + ttl_days * ?1 <= ?2)",
                    params![SECS_PER_DAY, now],
                )?;
                let removed = tx.execute(
                    "DELETE FROM persisted_locations WHERE created_at + ttl_days * ?1 <= ?2",
                    params![SECS_PER_DAY, now],
                )?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        if removed > 0 {
            tracing::info!(removed, "purged expired proximity cache rows");
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<ProximityStats, CacheError> {
        let now = Utc::now().timestamp();
        self.with_conn(move |conn| {
            let mut stats = ProximityStats::default();
            let mut stmt = conn.prepare_cached(
                "SELECT data_tier, source, created_at + ttl_days * ?1 <= ?2 FROM persisted_locations",
            )?;
            let rows = stmt.query_map(params![SECS_PER_DAY, now], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, bool>(2)?))
            })?;
            for row in rows {
                let (tier, source, expired) = row?;
                stats.total_entries += 1;
                if expired {
                    stats.expired_entries += 1;
                    continue;
                }
                *stats.by_tier.entry(tier).or_default() += 1;
                *stats.by_source.entry(source).or_default() += 1;
            }
            Ok(stats)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::interpolation::fixtures::small_model;
    use crate::models::interpolation::ModelParts;

    const WEEK: Duration = Duration::from_secs(7 * 86_400);

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn model_with(tier: DataTier, source: &str) -> InterpolationModel {
        let mut parts: ModelParts = serde_json::from_value(serde_json::to_value(small_model()).unwrap()).unwrap();
        parts.data_tier = tier;
        parts.source_provider_id = source.to_string();
        InterpolationModel::try_from(parts).unwrap()
    }

    fn candidate(id: i64, distance_km: f64, tier: DataTier, created_at: i64) -> Candidate {
        Candidate {
            id,
            distance_km,
            data_tier: tier,
            source: "x".into(),
            created_at,
            model_json: String::new(),
        }
    }

    #[test]
    fn nearest_fresh_wins() {
        let now = 1_000_000;
        let picked = select_candidate(
            &[
                candidate(1, 3.0, DataTier::Engineering, now - 10),
                candidate(2, 1.0, DataTier::Standard, now - 10),
            ],
            now,
            604_800,
        )
        .map(|c| c.id);
        assert_eq!(picked, Some(2));
    }

    #[test]
    fn fresh_shadows_stale_even_if_farther() {
        let now = 10_000_000;
        let picked = select_candidate(
            &[
                candidate(1, 0.2, DataTier::Engineering, now - 8 * 86_400),
                candidate(2, 4.0, DataTier::Standard, now - 3600),
            ],
            now,
            604_800,
        )
        .map(|c| c.id);
        assert_eq!(picked, Some(2));
    }

    #[test]
    fn ties_prefer_tier_then_recency() {
        let now = 1_000_000;
        let picked = select_candidate(
            &[
                candidate(1, 2.0, DataTier::Standard, now - 10),
                candidate(2, 2.0005, DataTier::Engineering, now - 500),
                candidate(3, 2.0, DataTier::Engineering, now - 20),
            ],
            now,
            604_800,
        )
        .map(|c| c.id);
        assert_eq!(picked, Some(3));
    }

    #[test]
    fn search_box_widens_near_poles_and_antimeridian() {
        let (_, _, min_lon, max_lon) = search_box(coord(89.99, 0.0), 5.0);
        assert_eq!((min_lon, max_lon), (-180.0, 180.0));
        let (_, _, min_lon, max_lon) = search_box(coord(0.0, 179.99), 5.0);
        assert_eq!((min_lon, max_lon), (-180.0, 180.0));
        let (min_lat, max_lat, min_lon, max_lon) = search_box(coord(40.0, -3.0), 5.0);
        assert!(min_lat < 39.96 && max_lat > 40.04);
        assert!(min_lon < -3.05 && max_lon > -2.95);
    }

    #[tokio::test]
    async fn hit_within_radius_miss_outside() {
        let cache = SqliteProximityCache::open_in_memory(30, WEEK).unwrap();
        let model = small_model();
        cache.save(coord(40.0, -3.0), &model).await.unwrap();

        let hit = cache.find_nearby(coord(40.03, -3.01), 5.0).await.unwrap().unwrap();
        assert!(hit.distance_km > 3.0 && hit.distance_km < 4.0);
        assert_eq!(*hit.model, model);

        assert!(cache.find_nearby(coord(41.0, -3.0), 5.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_row_is_dropped_and_next_candidate_served() {
        let cache = SqliteProximityCache::open_in_memory(30, WEEK).unwrap();
        let model = small_model();
        let nearest = cache.save(coord(40.0, -3.0), &model).await.unwrap();
        let farther = cache.save(coord(40.02, -3.0), &model).await.unwrap();
        cache
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE persisted_locations SET model_json = '{\"tilts\": []}' WHERE id = ?1",
                    params![nearest],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let hit = cache.find_nearby(coord(40.0, -3.0), 5.0).await.unwrap().unwrap();
        assert_eq!(hit.id, farther);
        assert_eq!(*hit.model, model);
        assert_eq!(cache.stats().await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn expired_rows_are_invisible_and_purged() {
        let cache = SqliteProximityCache::open_in_memory(30, WEEK).unwrap();
        let model = small_model();
        let old = Utc::now() - chrono::Duration::days(31);
        cache.save_at(coord(10.0, 10.0), &model, old).await.unwrap();
        cache.save(coord(20.0, 20.0), &model).await.unwrap();

        assert!(cache.find_nearby(coord(10.0, 10.0), 5.0).await.unwrap().is_none());
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.stats().await.unwrap().total_entries, 1);
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn newer_row_supersedes_older_at_same_point() {
        let cache = SqliteProximityCache::open_in_memory(30, WEEK).unwrap();
        let point = coord(48.0, 11.0);
        let first = cache
            .save_at(point, &model_with(DataTier::Standard, "pvgis"), Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        let second = cache
            .save(point, &model_with(DataTier::Standard, "open-meteo-archive"))
            .await
            .unwrap();
        assert!(second > first);

        let hit = cache.find_nearby(point, 5.0).await.unwrap().unwrap();
        assert_eq!(hit.id, second);
        assert_eq!(hit.source, "open-meteo-archive");

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.by_source.get("pvgis"), Some(&1));
        assert_eq!(stats.by_tier.get("standard"), Some(&2));
    }

    #[tokio::test]
    async fn persists_across_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proximity.db");
        {
            let cache = SqliteProximityCache::open(&path, 30, WEEK).unwrap();
            cache.save(coord(-33.87, 151.21), &small_model()).await.unwrap();
        }
        let cache = SqliteProximityCache::open(&path, 30, WEEK).unwrap();
        let hit = cache.find_nearby(coord(-33.87, 151.21), 1.0).await.unwrap();
        assert!(hit.is_some());
    }
}
