use crate::*;

use std::io::Write;

/// One accepted payment. Constructed only after validation, so the amount is
/// always finite and non-negative by the time it gets here.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub category_key: String,
    pub amount: f64,
    pub receipt_ref: String,
}

#[derive(Debug, Default)]
pub struct LedgerSummary {
    pub totals: HashMap<&'static str, f64>,
    pub grand_total: f64,
}

/// Append-only per-account log, one CSV file per chat id. Rows carry the
/// English label as the fixed reference form: `date,label,amount,receipt_ref`.
/// Callers serialize same-account access through the registry's account lock;
/// the store itself only guarantees that distinct accounts touch distinct
/// files.
pub struct LedgerStore {
    data_dir: PathBuf,
}

impl LedgerStore {
    pub fn new(data_dir: &Path) -> LedgerStore {
        LedgerStore { data_dir: data_dir.to_path_buf() }
    }

    fn path_for(&self, chat_id: ChatId) -> PathBuf {
        self.data_dir.join(format!("ledger_{}.csv", chat_id.0))
    }

    pub fn append(&self, chat_id: ChatId, entry: &LedgerEntry) -> Result<(), CoreError> {
        let category = category_by_key(&entry.category_key)
            .filter(|c| !c.pseudo)
            .ok_or_else(|| CoreError::UnknownCategory(entry.category_key.clone()))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(chat_id))?;
        writeln!(
            file,
            "{},{},{:.2},{}",
            entry.date.format("%Y-%m-%d"),
            category.label_en,
            entry.amount,
            entry.receipt_ref
        )?;
        info!("Appended {} entry for {}", entry.category_key, chat_id);
        Ok(())
    }

    /// Replaces the whole log with the empty one. Runs under the account
    /// lock, so it owns the log exclusively: appends that finished before the
    /// reset acquired the lock are cleared, later ones see the empty log.
    pub fn reset(&self, chat_id: ChatId) -> Result<(), CoreError> {
        fs::write(self.path_for(chat_id), "")?;
        info!("Ledger reset for {}", chat_id);
        Ok(())
    }

    /// Replays the log into per-category sums plus a grand total. Rows that
    /// fail to parse (bad amount, unknown label) are skipped row-by-row, not
    /// treated as errors; a missing file is an empty ledger.
    pub fn aggregate(&self, chat_id: ChatId) -> Result<LedgerSummary, CoreError> {
        let path = self.path_for(chat_id);
        if !path.exists() {
            return Ok(LedgerSummary::default());
        }

        let content = fs::read_to_string(path)?;
        let mut summary = LedgerSummary::default();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let mut fields = line.splitn(4, ',');
            let (_date, label, amount) = match (fields.next(), fields.next(), fields.next()) {
                (Some(date), Some(label), Some(amount)) => (date, label, amount),
                _ => {
                    warn!("Skipping short ledger row for {}: {}", chat_id, line);
                    continue;
                }
            };

            let Some(category) = category_by_label_en(label) else {
                warn!("Skipping row with unknown category for {}: {}", chat_id, label);
                continue;
            };
            let amount = match amount.parse::<f64>() {
                Ok(amount) if amount.is_finite() && amount >= 0.0 => amount,
                _ => {
                    warn!("Skipping row with bad amount for {}: {}", chat_id, amount);
                    continue;
                }
            };

            *summary.totals.entry(category.key).or_default() += amount;
            summary.grand_total += amount;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(key: &str, amount: f64) -> LedgerEntry {
        LedgerEntry {
            date: NaiveDate::from_ymd_opt(2026, 8, 27).unwrap(),
            category_key: key.to_string(),
            amount,
            receipt_ref: "photo-abc".to_string(),
        }
    }

    #[test]
    fn append_then_aggregate_reflects_entry_once() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::new(dir.path());
        let chat = ChatId(1);

        store.append(chat, &entry("food", 250.0)).unwrap();
        store.append(chat, &entry("transportation", 100.5)).unwrap();
        store.append(chat, &entry("food", 49.5)).unwrap();

        let summary = store.aggregate(chat).unwrap();
        assert_eq!(summary.totals.get("food"), Some(&299.5));
        assert_eq!(summary.totals.get("transportation"), Some(&100.5));
        assert_eq!(summary.grand_total, 400.0);
    }

    #[test]
    fn reset_yields_empty_summary() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::new(dir.path());
        let chat = ChatId(2);

        store.append(chat, &entry("pets", 30.0)).unwrap();
        store.reset(chat).unwrap();

        let summary = store.aggregate(chat).unwrap();
        assert!(summary.totals.is_empty());
        assert_eq!(summary.grand_total, 0.0);

        // Appends after a reset land in the fresh log.
        store.append(chat, &entry("pets", 5.0)).unwrap();
        assert_eq!(store.aggregate(chat).unwrap().grand_total, 5.0);
    }

    #[test]
    fn aggregate_skips_malformed_rows() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::new(dir.path());
        let chat = ChatId(3);

        fs::write(
            dir.path().join("ledger_3.csv"),
            "2026-08-01,Food,12.00,photo-1\n\
             not a row at all\n\
             2026-08-02,Unknown category,5.00,photo-2\n\
             2026-08-03,Food,twelve,photo-3\n\
             2026-08-04,Health,-4.00,photo-4\n\
             2026-08-05,Health,8.00,photo-5\n",
        )
        .unwrap();

        let summary = store.aggregate(chat).unwrap();
        assert_eq!(summary.totals.get("food"), Some(&12.0));
        assert_eq!(summary.totals.get("health"), Some(&8.0));
        assert_eq!(summary.totals.len(), 2);
        assert_eq!(summary.grand_total, 20.0);
    }

    #[test]
    fn aggregate_of_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::new(dir.path());
        let summary = store.aggregate(ChatId(404)).unwrap();
        assert!(summary.totals.is_empty());
        assert_eq!(summary.grand_total, 0.0);
    }

    #[test]
    fn append_rejects_pseudo_and_unknown_categories() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::new(dir.path());
        let chat = ChatId(4);

        let err = store.append(chat, &entry("Photo", 1.0)).unwrap_err();
        assert!(matches!(err, CoreError::UnknownCategory(_)));
        let err = store.append(chat, &entry("gambling", 1.0)).unwrap_err();
        assert!(matches!(err, CoreError::UnknownCategory(_)));
        assert!(store.aggregate(chat).unwrap().totals.is_empty());
    }

    #[test]
    fn rows_use_reference_labels_and_two_decimals() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::new(dir.path());
        let chat = ChatId(5);

        store.append(chat, &entry("clothing-and-footwear", 19.999)).unwrap();
        let content = fs::read_to_string(dir.path().join("ledger_5.csv")).unwrap();
        assert_eq!(content, "2026-08-27,Clothing and footwear,20.00,photo-abc\n");
    }
}
