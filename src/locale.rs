use crate::*;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    En,
    Ru,
}

impl Language {
    /// Parses a language-choice keyboard reply ("EN"/"RU").
    pub fn from_choice(text: &str) -> Option<Language> {
        match text.trim() {
            "EN" => Some(Language::En),
            "RU" => Some(Language::Ru),
            _ => None,
        }
    }
}

pub struct Category {
    pub key: &'static str,
    pub label_en: &'static str,
    pub label_ru: &'static str,
    /// Legacy column-alignment entries (Date/Photo/Description). Never shown
    /// in menus, never aggregated.
    pub pseudo: bool,
}

pub const CATEGORIES: &[Category] = &[
    Category { key: "Date", label_en: "", label_ru: "", pseudo: true },
    Category { key: "other-costs", label_en: "Other costs", label_ru: "Прочие расходы", pseudo: false },
    Category { key: "housing", label_en: "Housing", label_ru: "Жилье", pseudo: false },
    Category { key: "food", label_en: "Food", label_ru: "Питание", pseudo: false },
    Category { key: "transportation", label_en: "Transportation", label_ru: "Транспорт", pseudo: false },
    Category { key: "health", label_en: "Health", label_ru: "Здоровье", pseudo: false },
    Category { key: "clothing-and-footwear", label_en: "Clothing and footwear", label_ru: "Одежда и обувь", pseudo: false },
    Category { key: "entertainment", label_en: "Entertainment", label_ru: "Развлечения", pseudo: false },
    Category { key: "education", label_en: "Education", label_ru: "Образование", pseudo: false },
    Category { key: "personal-care", label_en: "Personal care", label_ru: "Личные расходы", pseudo: false },
    Category { key: "travel", label_en: "Travel", label_ru: "Путешествия", pseudo: false },
    Category { key: "children", label_en: "Children", label_ru: "Дети", pseudo: false },
    Category { key: "pets", label_en: "Pets", label_ru: "Домашние животные", pseudo: false },
    Category { key: "electronics-and-gadgets", label_en: "Electronics and gadgets", label_ru: "Техника и гаджеты", pseudo: false },
    Category { key: "taxes-and-insurance", label_en: "Taxes and insurance", label_ru: "Налоги и страховки", pseudo: false },
    Category { key: "credits-and-debts", label_en: "Credits and debts", label_ru: "Кредиты и долги", pseudo: false },
    Category { key: "savings-and-investments", label_en: "Savings and investments", label_ru: "Сбережения и инвестиции", pseudo: false },
    Category { key: "Photo", label_en: "", label_ru: "", pseudo: true },
    Category { key: "Description", label_en: "", label_ru: "", pseudo: true },
];

/// Catalog entries that may appear in menus and ledger rows, in declaration
/// order.
pub fn selectable_categories() -> impl Iterator<Item = &'static Category> {
    CATEGORIES.iter().filter(|c| !c.pseudo)
}

pub fn category_by_key(key: &str) -> Option<&'static Category> {
    CATEGORIES.iter().find(|c| c.key == key)
}

/// Resolves a persisted ledger row back to its catalog entry. Pseudo entries
/// have empty labels and must never match.
pub fn category_by_label_en(label: &str) -> Option<&'static Category> {
    CATEGORIES.iter().find(|c| !c.pseudo && c.label_en == label)
}

pub fn category_label(key: &str, language: Option<Language>) -> Option<&'static str> {
    category_by_key(key).map(|c| match language.unwrap_or(Language::En) {
        Language::En => c.label_en,
        Language::Ru => c.label_ru,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKey {
    ChooseLanguage,
    LanguageChanged,
    BillButton,
    MainMenu,
    ChooseCategory,
    Back,
    SendReceipt,
    PaymentSaved,
    PaymentInvalid,
    LedgerCleared,
    Total,
}

/// Total lookup: an unset language falls back to EN rather than failing.
pub fn text(key: TextKey, language: Option<Language>) -> &'static str {
    let en = matches!(language.unwrap_or(Language::En), Language::En);
    match key {
        TextKey::ChooseLanguage => "Please choose your language / Пожалуйста, выберите язык:",
        TextKey::LanguageChanged => {
            if en { "Language successfully changed" } else { "Язык успешно сменен" }
        }
        TextKey::BillButton => if en { "👉 Bill" } else { "👉 Чек" },
        TextKey::MainMenu => {
            if en {
                "Tap the button below to record a bill"
            } else {
                "Нажмите кнопку ниже, чтобы записать чек"
            }
        }
        TextKey::ChooseCategory => if en { "Choose a category" } else { "Выбери категорию" },
        TextKey::Back => if en { "Back" } else { "Назад" },
        TextKey::SendReceipt => {
            if en {
                "Send a photo of the receipt with the amount in the caption"
            } else {
                "Отправьте фото чека, указав сумму в подписи"
            }
        }
        TextKey::PaymentSaved => if en { "Payment saved" } else { "Платеж сохранен" },
        TextKey::PaymentInvalid => {
            if en {
                "Please send a photo with a numeric amount in the caption"
            } else {
                "Пожалуйста, отправьте фото с суммой в подписи"
            }
        }
        TextKey::LedgerCleared => if en { "All records removed" } else { "Все записи удалены" },
        TextKey::Total => if en { "Total" } else { "Итого" },
    }
}

/// The main-menu reply button doubles as the trigger text, so match it
/// loosely: either language, any case, pointing finger optional.
pub fn is_bill_trigger(text: &str) -> bool {
    let normalized = text.trim().trim_start_matches("👉").trim().to_lowercase();
    normalized == "bill" || normalized == "чек"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectable_excludes_pseudo_categories() {
        let keys: Vec<&str> = selectable_categories().map(|c| c.key).collect();
        assert_eq!(keys.len(), 16);
        assert!(!keys.contains(&"Date"));
        assert!(!keys.contains(&"Photo"));
        assert!(!keys.contains(&"Description"));
        assert_eq!(keys[0], "other-costs");
        assert_eq!(keys[keys.len() - 1], "savings-and-investments");
    }

    #[test]
    fn label_lookup_falls_back_to_english() {
        assert_eq!(category_label("food", None), Some("Food"));
        assert_eq!(category_label("food", Some(Language::Ru)), Some("Питание"));
        assert_eq!(category_label("no-such-key", None), None);
    }

    #[test]
    fn pseudo_labels_never_resolve() {
        assert!(category_by_label_en("").is_none());
        assert!(category_by_label_en("Food").is_some());
    }

    #[test]
    fn text_lookup_never_fails_for_unset_language() {
        assert_eq!(text(TextKey::Total, None), "Total");
        assert_eq!(text(TextKey::Total, Some(Language::Ru)), "Итого");
    }

    #[test]
    fn bill_trigger_matches_both_languages() {
        assert!(is_bill_trigger("👉 Bill"));
        assert!(is_bill_trigger("👉 Чек"));
        assert!(is_bill_trigger("bill"));
        assert!(is_bill_trigger("ЧЕК"));
        assert!(!is_bill_trigger("billing"));
        assert!(!is_bill_trigger("/status"));
    }

    #[test]
    fn language_choice_parsing() {
        assert_eq!(Language::from_choice(" EN "), Some(Language::En));
        assert_eq!(Language::from_choice("RU"), Some(Language::Ru));
        assert_eq!(Language::from_choice("en"), None);
    }
}
