//! SQLite database operations
//!
//! All database access goes through this module.

use sqlx::SqlitePool;
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist and runs pending
    /// migrations automatically.
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
        })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Liveness probe used by the health endpoint.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Entities
    // =========================================================================

    pub async fn get_entity_by_id(&self, id: &str) -> Result<Option<ApEntity>, AppError> {
        let entity = sqlx::query_as::<_, ApEntity>("SELECT * FROM ap_entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entity)
    }

    pub async fn get_entity_by_ccid(&self, ccid: &str) -> Result<Option<ApEntity>, AppError> {
        let entity = sqlx::query_as::<_, ApEntity>("SELECT * FROM ap_entities WHERE ccid = ?")
            .bind(ccid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entity)
    }

    pub async fn create_entity(&self, entity: &ApEntity) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ap_entities (
                id, ccid, public_key, private_key,
                home_stream, notification_stream, follow_stream
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.ccid)
        .bind(&entity.public_key)
        .bind(&entity.private_key)
        .bind(&entity.home_stream)
        .bind(&entity.notification_stream)
        .bind(&entity.follow_stream)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_entity(&self, entity: &ApEntity) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE ap_entities SET
                ccid = ?, public_key = ?, private_key = ?,
                home_stream = ?, notification_stream = ?, follow_stream = ?
            WHERE id = ?
            "#,
        )
        .bind(&entity.ccid)
        .bind(&entity.public_key)
        .bind(&entity.private_key)
        .bind(&entity.home_stream)
        .bind(&entity.notification_stream)
        .bind(&entity.follow_stream)
        .bind(&entity.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Persons
    // =========================================================================

    pub async fn get_person_by_id(&self, id: &str) -> Result<Option<ApPerson>, AppError> {
        let person = sqlx::query_as::<_, ApPerson>("SELECT * FROM ap_persons WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(person)
    }

    pub async fn upsert_person(&self, person: &ApPerson) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ap_persons (id, name, summary, icon_url)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                summary = excluded.summary,
                icon_url = excluded.icon_url
            "#,
        )
        .bind(&person.id)
        .bind(&person.name)
        .bind(&person.summary)
        .bind(&person.icon_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Follows (CC -> AP)
    // =========================================================================

    pub async fn save_follow(&self, follow: &ApFollow) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ap_follows (id, accepted, publisher_person_url, subscriber_user_id)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&follow.id)
        .bind(follow.accepted)
        .bind(&follow.publisher_person_url)
        .bind(&follow.subscriber_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_follow_by_id(&self, id: &str) -> Result<Option<ApFollow>, AppError> {
        let follow = sqlx::query_as::<_, ApFollow>("SELECT * FROM ap_follows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(follow)
    }

    pub async fn update_follow(&self, follow: &ApFollow) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE ap_follows SET
                accepted = ?, publisher_person_url = ?, subscriber_user_id = ?
            WHERE id = ?
            "#,
        )
        .bind(follow.accepted)
        .bind(&follow.publisher_person_url)
        .bind(&follow.subscriber_user_id)
        .bind(&follow.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Follows owned by a local entity.
    pub async fn get_follows(&self, subscriber_user_id: &str) -> Result<Vec<ApFollow>, AppError> {
        let follows =
            sqlx::query_as::<_, ApFollow>("SELECT * FROM ap_follows WHERE subscriber_user_id = ?")
                .bind(subscriber_user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(follows)
    }

    /// Follows targeting a remote actor, used to fan inbound notes into
    /// local follow streams.
    pub async fn get_follows_by_publisher(
        &self,
        publisher_person_url: &str,
    ) -> Result<Vec<ApFollow>, AppError> {
        let follows = sqlx::query_as::<_, ApFollow>(
            "SELECT * FROM ap_follows WHERE publisher_person_url = ?",
        )
        .bind(publisher_person_url)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }

    /// Delete a follow and return the removed row.
    pub async fn remove_follow(&self, id: &str) -> Result<Option<ApFollow>, AppError> {
        let follow = self.get_follow_by_id(id).await?;
        if follow.is_some() {
            sqlx::query("DELETE FROM ap_follows WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(follow)
    }

    // =========================================================================
    // Followers (AP -> CC)
    // =========================================================================

    pub async fn save_follower(&self, follower: &ApFollower) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ap_followers (id, subscriber_person_url, publisher_user_id, subscriber_inbox)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&follower.id)
        .bind(&follower.subscriber_person_url)
        .bind(&follower.publisher_user_id)
        .bind(&follower.subscriber_inbox)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_follower_by_tuple(
        &self,
        publisher_user_id: &str,
        subscriber_person_url: &str,
    ) -> Result<Option<ApFollower>, AppError> {
        let follower = sqlx::query_as::<_, ApFollower>(
            "SELECT * FROM ap_followers WHERE publisher_user_id = ? AND subscriber_person_url = ?",
        )
        .bind(publisher_user_id)
        .bind(subscriber_person_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(follower)
    }

    /// Followers of a local entity.
    pub async fn get_followers(
        &self,
        publisher_user_id: &str,
    ) -> Result<Vec<ApFollower>, AppError> {
        let followers = sqlx::query_as::<_, ApFollower>(
            "SELECT * FROM ap_followers WHERE publisher_user_id = ?",
        )
        .bind(publisher_user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(followers)
    }

    /// The full follower set, read by the fan-out supervisor each tick.
    pub async fn get_all_followers(&self) -> Result<Vec<ApFollower>, AppError> {
        let followers = sqlx::query_as::<_, ApFollower>("SELECT * FROM ap_followers")
            .fetch_all(&self.pool)
            .await?;
        Ok(followers)
    }

    /// Delete a follower by tuple and return the removed row.
    pub async fn remove_follower(
        &self,
        publisher_user_id: &str,
        subscriber_person_url: &str,
    ) -> Result<Option<ApFollower>, AppError> {
        let follower = self
            .get_follower_by_tuple(publisher_user_id, subscriber_person_url)
            .await?;
        if follower.is_some() {
            sqlx::query(
                "DELETE FROM ap_followers WHERE publisher_user_id = ? AND subscriber_person_url = ?",
            )
            .bind(publisher_user_id)
            .bind(subscriber_person_url)
            .execute(&self.pool)
            .await?;
        }
        Ok(follower)
    }

    // =========================================================================
    // Object references
    // =========================================================================

    /// Unique insert on ap_object_id.
    ///
    /// This is the pessimistic claim gate for inbound Create/Like: a second
    /// concurrent delivery of the same activity fails the primary-key
    /// constraint and short-circuits.
    pub async fn create_object_reference(
        &self,
        reference: &ApObjectReference,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO ap_object_references (ap_object_id, cc_object_id) VALUES (?, ?)")
            .bind(&reference.ap_object_id)
            .bind(&reference.cc_object_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fill in the cc_object_id once the CC write succeeds.
    pub async fn update_object_reference(
        &self,
        reference: &ApObjectReference,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ap_object_references (ap_object_id, cc_object_id)
            VALUES (?, ?)
            ON CONFLICT(ap_object_id) DO UPDATE SET cc_object_id = excluded.cc_object_id
            "#,
        )
        .bind(&reference.ap_object_id)
        .bind(&reference.cc_object_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_object_reference_by_ap_id(
        &self,
        ap_object_id: &str,
    ) -> Result<Option<ApObjectReference>, AppError> {
        let reference = sqlx::query_as::<_, ApObjectReference>(
            "SELECT * FROM ap_object_references WHERE ap_object_id = ?",
        )
        .bind(ap_object_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reference)
    }

    pub async fn get_object_reference_by_cc_id(
        &self,
        cc_object_id: &str,
    ) -> Result<Option<ApObjectReference>, AppError> {
        let reference = sqlx::query_as::<_, ApObjectReference>(
            "SELECT * FROM ap_object_references WHERE cc_object_id = ?",
        )
        .bind(cc_object_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reference)
    }

    pub async fn delete_object_reference(&self, ap_object_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM ap_object_references WHERE ap_object_id = ?")
            .bind(ap_object_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
