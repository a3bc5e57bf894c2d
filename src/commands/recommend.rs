use crate::commands::kpi::KpiSnapshot;

pub const MIN_AVERAGE_BASKET: f64 = 400.0;
pub const MIN_HOURLY_YIELD: f64 = 180.0;
pub const MIN_QUOTE_ACCEPTANCE_RATE: f64 = 60.0;
// 2 new patients per business day over a 22-day month.
pub const MIN_NEW_PATIENTS: i64 = 44;

pub const ADVICE_AVERAGE_BASKET: &str =
    "Votre panier moyen est inférieur à 400 €. Valorisez les plans de traitement complets et proposez systématiquement les soins complémentaires adaptés.";
pub const ADVICE_HOURLY_YIELD: &str =
    "Votre rendement horaire est inférieur à 180 €/h. Optimisez le remplissage de l'agenda et regroupez les actes longs sur des créneaux dédiés.";
pub const ADVICE_QUOTE_RATE: &str =
    "Votre taux d'acceptation des devis est inférieur à 60 %. Présentez les devis en personne et proposez des facilités de paiement.";
pub const ADVICE_NEW_PATIENTS: &str =
    "Vous avez accueilli moins de 44 nouveaux patients ce mois-ci. Renforcez votre visibilité locale et relancez les patients inactifs.";
pub const ADVICE_DEFAULT_KEEP_UP: &str =
    "Tous vos indicateurs sont au vert ce mois-ci. Maintenez vos bonnes pratiques et continuez sur cette lancée.";
pub const ADVICE_DEFAULT_MONITOR: &str =
    "Surveillez l'évolution de vos indicateurs d'un mois sur l'autre pour détecter toute dérive au plus tôt.";

// Rules fire on strict thresholds, in a fixed order. The quote rule stays
// quiet when no quote was issued at all.
pub fn build_recommendations(snapshot: &KpiSnapshot) -> Vec<String> {
    let mut advice = Vec::new();

    if snapshot.average_basket < MIN_AVERAGE_BASKET {
        advice.push(ADVICE_AVERAGE_BASKET.to_string());
    }
    if snapshot.hourly_yield < MIN_HOURLY_YIELD {
        advice.push(ADVICE_HOURLY_YIELD.to_string());
    }
    if snapshot.quote_count > 0 && snapshot.quote_acceptance_rate < MIN_QUOTE_ACCEPTANCE_RATE {
        advice.push(ADVICE_QUOTE_RATE.to_string());
    }
    if snapshot.new_patient_count < MIN_NEW_PATIENTS {
        advice.push(ADVICE_NEW_PATIENTS.to_string());
    }

    if advice.is_empty() {
        advice.push(ADVICE_DEFAULT_KEEP_UP.to_string());
        advice.push(ADVICE_DEFAULT_MONITOR.to_string());
    }
    advice
}
