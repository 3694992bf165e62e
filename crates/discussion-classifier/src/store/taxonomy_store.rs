//! Thematic/topic taxonomy and label-to-topic links.
use crate::store::schema::{LabelTopic, SimilarTopic, Thematic, ThematicCatalogEntry, Topic};
use crate::store::vector::{cosine_similarity, decode_column, decode_embedding, encode_embedding, rank};
use crate::store::{map_insert_error, parse_timestamp, PooledConnection, SqlitePool, StoreResult};
use crate::utils::TextUtils;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Catalog seeded on first start: (name, color).
pub const DEFAULT_THEMATICS: &[(&str, &str)] = &[
    ("Gestion de Compte", "#3b82f6"),
    ("Dossier et Candidature", "#8b5cf6"),
    ("Accompagnement et Organismes", "#10b981"),
    ("Procédures VAE", "#f59e0b"),
    ("Jury et Validation", "#ef4444"),
    ("Aspects Financiers", "#14b8a6"),
    ("Technique et Plateforme", "#6b7280"),
];

#[derive(Debug, Clone)]
pub struct NewTopic<'a> {
    pub thematic_id: &'a str,
    pub name: &'a str,
    pub slug: &'a str,
    pub embedding: Option<&'a [f32]>,
    pub description: Option<&'a str>,
}

/// A link to upsert for one label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTopicLink {
    pub topic_id: String,
    pub confidence: f64,
    pub is_primary: bool,
}

pub struct TaxonomyStore {
    pool: Arc<SqlitePool>,
}

impl TaxonomyStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> StoreResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    pub fn create_thematic(
        &self,
        name: &str,
        description: Option<&str>,
        color: Option<&str>,
        display_order: i64,
    ) -> StoreResult<Thematic> {
        let thematic = Thematic {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            slug: TextUtils::slugify(name),
            description: description.map(str::to_string),
            color: color.map(str::to_string),
            display_order,
            created_at: Utc::now(),
        };
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO thematics (id, name, slug, description, color, display_order, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                thematic.id,
                thematic.name,
                thematic.slug,
                thematic.description,
                thematic.color,
                thematic.display_order,
                thematic.created_at.to_rfc3339()
            ],
        )
        .map_err(|e| map_insert_error(e, "thematic", name))?;
        Ok(thematic)
    }

    /// Inserts the default thematics that are missing; returns how many were added.
    pub fn seed_default_thematics(&self) -> StoreResult<usize> {
        let conn = self.get_conn()?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;
        for (order, (name, color)) in DEFAULT_THEMATICS.iter().enumerate() {
            inserted += conn.execute(
                "INSERT OR IGNORE INTO thematics (id, name, slug, description, color, display_order, created_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    name,
                    TextUtils::slugify(name),
                    color,
                    (order + 1) as i64,
                    now
                ],
            )?;
        }
        if inserted > 0 {
            info!("Seeded {} default thematic(s)", inserted);
        }
        Ok(inserted)
    }

    pub fn list_thematics(&self) -> StoreResult<Vec<Thematic>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, slug, description, color, display_order, created_at
             FROM thematics ORDER BY display_order, name",
        )?;
        let thematics = stmt
            .query_map([], Self::row_to_thematic)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(thematics)
    }

    /// Topics scoring at least `threshold`, most similar first, each with a few
    /// label names already linked to it.
    pub fn find_similar_topics(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
        examples_per_topic: usize,
    ) -> StoreResult<Vec<SimilarTopic>> {
        let conn = self.get_conn()?;
        let mut scored = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.thematic_id, th.name, t.embedding
                 FROM topics t JOIN thematics th ON th.id = t.thematic_id
                 WHERE t.embedding IS NOT NULL
                 ORDER BY t.rowid",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let bytes: Vec<u8> = row.get(4)?;
                let similarity = cosine_similarity(embedding, &decode_embedding(&bytes)?);
                scored.push((
                    (
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ),
                    similarity,
                ));
            }
        }

        let mut candidates = Vec::new();
        for ((id, name, thematic_id, thematic_name), similarity) in rank(scored, threshold, limit) {
            let example_labels = Self::example_labels_with_conn(&conn, &id, examples_per_topic)?;
            candidates.push(SimilarTopic {
                id,
                name,
                thematic_id,
                thematic_name,
                similarity,
                example_labels,
            });
        }
        debug!("Topic search: {} candidate(s) at threshold {:.2}", candidates.len(), threshold);
        Ok(candidates)
    }

    fn example_labels_with_conn(
        conn: &rusqlite::Connection,
        topic_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT l.name FROM label_topics lt JOIN labels l ON l.id = lt.label_id
             WHERE lt.topic_id = ?1
             ORDER BY lt.confidence DESC, lt.created_at
             LIMIT ?2",
        )?;
        let names = stmt
            .query_map(params![topic_id, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn example_labels(&self, topic_id: &str, limit: usize) -> StoreResult<Vec<String>> {
        let conn = self.get_conn()?;
        Self::example_labels_with_conn(&conn, topic_id, limit)
    }

    /// Every thematic with its topics, in display order.
    pub fn catalog(&self) -> StoreResult<Vec<ThematicCatalogEntry>> {
        let thematics = self.list_thematics()?;
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, thematic_id, name, slug, embedding, description, created_at
             FROM topics ORDER BY name",
        )?;
        let mut by_thematic: HashMap<String, Vec<Topic>> = HashMap::new();
        for topic in stmt.query_map([], Self::row_to_topic)? {
            let topic = topic?;
            by_thematic.entry(topic.thematic_id.clone()).or_default().push(topic);
        }
        Ok(thematics
            .into_iter()
            .map(|thematic| {
                let topics = by_thematic.remove(&thematic.id).unwrap_or_default();
                ThematicCatalogEntry { thematic, topics }
            })
            .collect())
    }

    pub fn get_topic(&self, topic_id: &str) -> StoreResult<Option<Topic>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT id, thematic_id, name, slug, embedding, description, created_at
                 FROM topics WHERE id = ?1",
                [topic_id],
                Self::row_to_topic,
            )
            .optional()?)
    }

    pub fn find_topic_by_slug(&self, thematic_id: &str, slug: &str) -> StoreResult<Option<Topic>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT id, thematic_id, name, slug, embedding, description, created_at
                 FROM topics WHERE thematic_id = ?1 AND slug = ?2
                 ORDER BY rowid LIMIT 1",
                params![thematic_id, slug],
                Self::row_to_topic,
            )
            .optional()?)
    }

    pub fn create_topic(&self, new: &NewTopic<'_>) -> StoreResult<Topic> {
        let topic = Topic {
            id: Uuid::new_v4().to_string(),
            thematic_id: new.thematic_id.to_string(),
            name: new.name.trim().to_string(),
            slug: new.slug.to_string(),
            embedding: new.embedding.map(|e| e.to_vec()),
            description: new.description.map(str::to_string),
            created_at: Utc::now(),
        };
        let blob = new.embedding.map(encode_embedding).transpose()?;
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO topics (id, thematic_id, name, slug, embedding, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                topic.id,
                topic.thematic_id,
                topic.name,
                topic.slug,
                blob,
                topic.description,
                topic.created_at.to_rfc3339()
            ],
        )
        .map_err(|e| map_insert_error(e, "topic", new.slug))?;
        info!("Created topic '{}' ({})", topic.name, topic.slug);
        Ok(topic)
    }

    /// Upserts links for `label_id` in one transaction. When a link is primary,
    /// every other link of the label is demoted first.
    pub fn upsert_label_topics(
        &self,
        label_id: &str,
        links: &[LabelTopicLink],
        assignment_method: &str,
    ) -> StoreResult<Vec<LabelTopic>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        for link in links {
            if link.is_primary {
                tx.execute(
                    "UPDATE label_topics SET is_primary = 0 WHERE label_id = ?1 AND topic_id != ?2",
                    params![label_id, link.topic_id],
                )?;
            }
            tx.execute(
                "INSERT INTO label_topics (id, label_id, topic_id, confidence, is_primary, assignment_method, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(label_id, topic_id) DO UPDATE SET
                     confidence = excluded.confidence,
                     is_primary = excluded.is_primary,
                     assignment_method = excluded.assignment_method",
                params![
                    Uuid::new_v4().to_string(),
                    label_id,
                    link.topic_id,
                    link.confidence,
                    link.is_primary,
                    assignment_method,
                    now
                ],
            )?;
        }
        tx.commit()?;
        drop(conn);

        self.topics_for_label(label_id)
    }

    pub fn topics_for_label(&self, label_id: &str) -> StoreResult<Vec<LabelTopic>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, label_id, topic_id, confidence, is_primary, assignment_method, created_at
             FROM label_topics WHERE label_id = ?1
             ORDER BY is_primary DESC, confidence DESC",
        )?;
        let links = stmt
            .query_map([label_id], Self::row_to_label_topic)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    fn row_to_thematic(row: &Row) -> rusqlite::Result<Thematic> {
        let created_at: String = row.get(6)?;
        Ok(Thematic {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            color: row.get(4)?,
            display_order: row.get(5)?,
            created_at: parse_timestamp(&created_at, 6)?,
        })
    }

    fn row_to_topic(row: &Row) -> rusqlite::Result<Topic> {
        let created_at: String = row.get(6)?;
        Ok(Topic {
            id: row.get(0)?,
            thematic_id: row.get(1)?,
            name: row.get(2)?,
            slug: row.get(3)?,
            embedding: decode_column(row.get(4)?, 4)?,
            description: row.get(5)?,
            created_at: parse_timestamp(&created_at, 6)?,
        })
    }

    fn row_to_label_topic(row: &Row) -> rusqlite::Result<LabelTopic> {
        let created_at: String = row.get(6)?;
        Ok(LabelTopic {
            id: row.get(0)?,
            label_id: row.get(1)?,
            topic_id: row.get(2)?,
            confidence: row.get(3)?,
            is_primary: row.get(4)?,
            assignment_method: row.get(5)?,
            created_at: parse_timestamp(&created_at, 6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ClassificationDatabase;

    fn seeded() -> ClassificationDatabase {
        let db = ClassificationDatabase::new_in_memory().unwrap();
        db.taxonomy.seed_default_thematics().unwrap();
        db
    }

    fn thematic_id(db: &ClassificationDatabase, name: &str) -> String {
        db.taxonomy
            .list_thematics()
            .unwrap()
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
            .id
    }

    #[test]
    fn test_seeding_is_idempotent_and_ordered() {
        let db = seeded();
        assert_eq!(db.taxonomy.seed_default_thematics().unwrap(), 0);
        let thematics = db.taxonomy.list_thematics().unwrap();
        assert_eq!(thematics.len(), DEFAULT_THEMATICS.len());
        assert_eq!(thematics[0].name, "Gestion de Compte");
        assert_eq!(thematics[3].slug, "procedures-vae");
    }

    #[test]
    fn test_duplicate_topic_slug_under_same_thematic_conflicts() {
        let db = seeded();
        let gestion = thematic_id(&db, "Gestion de Compte");
        let new = NewTopic {
            thematic_id: &gestion,
            name: "Connexion",
            slug: "connexion",
            embedding: Some(&[1.0, 0.0]),
            description: None,
        };
        let first = db.taxonomy.create_topic(&new).unwrap();

        let err = db.taxonomy.create_topic(&new).unwrap_err();
        assert!(err.is_uniqueness_conflict());
        let found = db.taxonomy.find_topic_by_slug(&gestion, "connexion").unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(db.get_stats().unwrap().topics, 1);

        let other = thematic_id(&db, "Procédures VAE");
        db.taxonomy
            .create_topic(&NewTopic {
                thematic_id: &other,
                ..new
            })
            .unwrap();
        assert_eq!(db.get_stats().unwrap().topics, 2);
    }

    #[test]
    fn test_similar_topics_carry_thematic_and_examples() {
        let db = seeded();
        let gestion = thematic_id(&db, "Gestion de Compte");
        let topic = db
            .taxonomy
            .create_topic(&NewTopic {
                thematic_id: &gestion,
                name: "Authentification et Connexion",
                slug: "authentification-et-connexion",
                embedding: Some(&[1.0, 0.0]),
                description: None,
            })
            .unwrap();
        db.taxonomy
            .create_topic(&NewTopic {
                thematic_id: &gestion,
                name: "Sans embedding",
                slug: "sans-embedding",
                embedding: None,
                description: None,
            })
            .unwrap();
        let label = db.labels.create("mot de passe oublié", Some(&[1.0, 0.0]), None).unwrap();
        db.taxonomy
            .upsert_label_topics(
                &label.id,
                &[LabelTopicLink {
                    topic_id: topic.id.clone(),
                    confidence: 0.9,
                    is_primary: true,
                }],
                "rag_agent",
            )
            .unwrap();

        let found = db.taxonomy.find_similar_topics(&[0.9, 0.1], 0.6, 5, 5).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].thematic_name, "Gestion de Compte");
        assert_eq!(found[0].example_labels, vec!["mot de passe oublié".to_string()]);

        let catalog = db.taxonomy.catalog().unwrap();
        assert_eq!(catalog.len(), DEFAULT_THEMATICS.len());
        assert_eq!(catalog[0].topics.len(), 2);
        assert!(catalog[1].topics.is_empty());
    }

    #[test]
    fn test_upsert_overwrites_and_keeps_single_primary() {
        let db = seeded();
        let tech = thematic_id(&db, "Technique et Plateforme");
        let mk = |name: &str| {
            db.taxonomy
                .create_topic(&NewTopic {
                    thematic_id: &tech,
                    name,
                    slug: &TextUtils::slugify(name),
                    embedding: Some(&[0.0, 1.0]),
                    description: None,
                })
                .unwrap()
        };
        let email = mk("Problèmes Email");
        let login = mk("Connexion");
        let label = db.labels.create("email non reçu", Some(&[0.0, 1.0]), None).unwrap();

        db.taxonomy
            .upsert_label_topics(
                &label.id,
                &[
                    LabelTopicLink { topic_id: email.id.clone(), confidence: 0.8, is_primary: true },
                    LabelTopicLink { topic_id: login.id.clone(), confidence: 0.5, is_primary: false },
                ],
                "rag_agent",
            )
            .unwrap();
        let links = db
            .taxonomy
            .upsert_label_topics(
                &label.id,
                &[LabelTopicLink { topic_id: login.id.clone(), confidence: 0.95, is_primary: true }],
                "rag_agent",
            )
            .unwrap();

        assert_eq!(links.len(), 2);
        let primaries: Vec<&LabelTopic> = links.iter().filter(|l| l.is_primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].topic_id, login.id);
        assert!((primaries[0].confidence - 0.95).abs() < 1e-9);
        assert!(db.taxonomy.find_topic_by_slug(&tech, "problemes-email").unwrap().is_some());
        assert_eq!(db.taxonomy.example_labels(&login.id, 5).unwrap(), vec!["email non reçu".to_string()]);
    }
}
