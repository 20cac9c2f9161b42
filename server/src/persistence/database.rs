//! PostgreSQL database operations.

use log::info;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

use super::PlayerRecord;

/// Tables are created on startup if missing
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id BIGSERIAL PRIMARY KEY,
        token TEXT UNIQUE,
        logged_in BOOLEAN NOT NULL DEFAULT FALSE,
        last_login TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS players (
        id BIGSERIAL PRIMARY KEY,
        account_id BIGINT NOT NULL UNIQUE REFERENCES accounts (id),
        name TEXT NOT NULL,
        map TEXT NOT NULL,
        x REAL NOT NULL,
        y REAL NOT NULL,
        hp INTEGER NOT NULL,
        hp_max INTEGER NOT NULL,
        mp INTEGER NOT NULL,
        mp_max INTEGER NOT NULL,
        level INTEGER NOT NULL,
        job_level INTEGER NOT NULL,
        base_exp BIGINT NOT NULL,
        job_exp BIGINT NOT NULL,
        str INTEGER NOT NULL,
        agi INTEGER NOT NULL,
        vit INTEGER NOT NULL,
        int INTEGER NOT NULL,
        dex INTEGER NOT NULL,
        luk INTEGER NOT NULL,
        atk INTEGER NOT NULL,
        m_atk INTEGER NOT NULL,
        def INTEGER NOT NULL,
        m_def INTEGER NOT NULL,
        attack_speed INTEGER NOT NULL,
        speed INTEGER NOT NULL,
        save_map TEXT,
        save_x REAL NOT NULL DEFAULT 0,
        save_y REAL NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
];

const PLAYER_COLUMNS: &str = "id, account_id, name, map, x, y, hp, hp_max, mp, mp_max,
    level, job_level, base_exp, job_exp, str, agi, vit, int, dex, luk,
    atk, m_atk, def, m_def, attack_speed, speed, save_map, save_x, save_y";

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn player_from_row(r: &PgRow) -> PlayerRecord {
    PlayerRecord {
        id: r.get("id"),
        account_id: r.get("account_id"),
        name: r.get("name"),
        map: r.get("map"),
        x: r.get("x"),
        y: r.get("y"),
        hp: r.get("hp"),
        hp_max: r.get("hp_max"),
        mp: r.get("mp"),
        mp_max: r.get("mp_max"),
        level: r.get("level"),
        job_level: r.get("job_level"),
        base_exp: r.get("base_exp"),
        job_exp: r.get("job_exp"),
        strength: r.get("str"),
        agi: r.get("agi"),
        vit: r.get("vit"),
        int: r.get("int"),
        dex: r.get("dex"),
        luk: r.get("luk"),
        atk: r.get("atk"),
        m_atk: r.get("m_atk"),
        def: r.get("def"),
        m_def: r.get("m_def"),
        attack_speed: r.get("attack_speed"),
        speed: r.get("speed"),
        save_map: r.get("save_map"),
        save_x: r.get("save_x"),
        save_y: r.get("save_y"),
    }
}

impl Database {
    /// Connect to the database
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Create missing tables
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Make sure an account exists for each development token
    pub async fn seed_tokens(&self, tokens: impl IntoIterator<Item = &str>) -> Result<(), sqlx::Error> {
        let mut seeded = 0;
        for token in tokens {
            let result = sqlx::query("INSERT INTO accounts (token) VALUES ($1) ON CONFLICT (token) DO NOTHING")
                .bind(token)
                .execute(&self.pool)
                .await?;
            seeded += result.rows_affected();
        }
        if seeded > 0 {
            info!("Seeded {} development accounts", seeded);
        }
        Ok(())
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    pub async fn account_for_token(&self, token: &str) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM accounts WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
    }

    /// Set the logged-in flag and last login timestamp
    pub async fn mark_logged_in(&self, account_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET logged_in = TRUE, last_login = NOW() WHERE id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn logout(&self, account_id: i64, remove_token: bool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET logged_in = FALSE,
                                 token = CASE WHEN $2 THEN NULL ELSE token END
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(remove_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Character Operations
    // =========================================================================

    pub async fn count_players(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM players")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn load_player(&self, account_id: i64) -> Result<Option<PlayerRecord>, sqlx::Error> {
        let query = format!("SELECT {} FROM players WHERE account_id = $1", PLAYER_COLUMNS);
        let row = sqlx::query(&query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(player_from_row))
    }

    /// Insert or update the account's character, returning its id
    pub async fn save_player(&self, record: &PlayerRecord) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO players (account_id, name, map, x, y, hp, hp_max, mp, mp_max,
                                  level, job_level, base_exp, job_exp, str, agi, vit, int, dex, luk,
                                  atk, m_atk, def, m_def, attack_speed, speed, save_map, save_x, save_y)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                     $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
             ON CONFLICT (account_id) DO UPDATE SET
                name = EXCLUDED.name,
                map = EXCLUDED.map,
                x = EXCLUDED.x,
                y = EXCLUDED.y,
                hp = EXCLUDED.hp,
                hp_max = EXCLUDED.hp_max,
                mp = EXCLUDED.mp,
                mp_max = EXCLUDED.mp_max,
                level = EXCLUDED.level,
                job_level = EXCLUDED.job_level,
                base_exp = EXCLUDED.base_exp,
                job_exp = EXCLUDED.job_exp,
                str = EXCLUDED.str,
                agi = EXCLUDED.agi,
                vit = EXCLUDED.vit,
                int = EXCLUDED.int,
                dex = EXCLUDED.dex,
                luk = EXCLUDED.luk,
                atk = EXCLUDED.atk,
                m_atk = EXCLUDED.m_atk,
                def = EXCLUDED.def,
                m_def = EXCLUDED.m_def,
                attack_speed = EXCLUDED.attack_speed,
                speed = EXCLUDED.speed,
                save_map = EXCLUDED.save_map,
                save_x = EXCLUDED.save_x,
                save_y = EXCLUDED.save_y,
                updated_at = NOW()
             RETURNING id",
        )
        .bind(record.account_id)
        .bind(&record.name)
        .bind(&record.map)
        .bind(record.x)
        .bind(record.y)
        .bind(record.hp)
        .bind(record.hp_max)
        .bind(record.mp)
        .bind(record.mp_max)
        .bind(record.level)
        .bind(record.job_level)
        .bind(record.base_exp)
        .bind(record.job_exp)
        .bind(record.strength)
        .bind(record.agi)
        .bind(record.vit)
        .bind(record.int)
        .bind(record.dex)
        .bind(record.luk)
        .bind(record.atk)
        .bind(record.m_atk)
        .bind(record.def)
        .bind(record.m_def)
        .bind(record.attack_speed)
        .bind(record.speed)
        .bind(&record.save_map)
        .bind(record.save_x)
        .bind(record.save_y)
        .fetch_one(&self.pool)
        .await
    }
}
