//! Folds the plaintext `basic_auth` column into the `auth` provider
//! document, encrypts the document through the configured strategy, and
//! drops the plaintext column.

use rusqlite::{params, Transaction};
use serde_json::{Map, Value};

use crate::encryption::EncryptionStrategy;
use crate::error::Result;

pub fn run(tx: &Transaction<'_>, strategy: &dyn EncryptionStrategy) -> Result<()> {
    let mut stmt = tx.prepare("SELECT id, basic_auth, auth FROM teams")?;
    let teams = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    for (team_id, basic_auth, auth) in teams {
        // Existing auth documents are still plaintext at this version.
        let mut providers: Map<String, Value> = match auth.as_deref() {
            Some(raw) => serde_json::from_str(raw)?,
            None => Map::new(),
        };

        if let Some(raw) = basic_auth.as_deref() {
            providers.insert("basic".to_string(), serde_json::from_str(raw)?);
        }

        let document = serde_json::to_vec(&Value::Object(providers))?;
        let (payload, nonce) = strategy.encrypt(&document)?;

        tx.execute(
            "UPDATE teams SET auth = ?1, nonce = ?2 WHERE id = ?3",
            params![payload, nonce, team_id],
        )?;
    }

    tx.execute_batch("ALTER TABLE teams DROP COLUMN basic_auth")?;
    Ok(())
}
