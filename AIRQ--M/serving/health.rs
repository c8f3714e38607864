use serde::{Deserialize, Serialize};

/// AQI band, ordered from cleanest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// 0-50.
    Good,
    /// 51-100.
    Moderate,
    /// 101-150.
    UnhealthySensitive,
    /// 151-200.
    Unhealthy,
    /// 201-300.
    VeryUnhealthy,
    /// Above 300.
    Hazardous,
}

impl Severity {
    /// Band containing `aqi`; bounds are inclusive upper limits.
    #[must_use]
    pub const fn from_aqi(aqi: i32) -> Self {
        match aqi {
            i32::MIN..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthySensitive,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    /// Snake-case name used in translation keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Moderate => "moderate",
            Self::UnhealthySensitive => "unhealthy_sensitive",
            Self::Unhealthy => "unhealthy",
            Self::VeryUnhealthy => "very_unhealthy",
            Self::Hazardous => "hazardous",
        }
    }
}

/// Display information for an AQI band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AqiCategory {
    /// Human-readable band name.
    pub level: &'static str,
    /// Translation key for `level`.
    pub level_key: String,
    /// Hex colour.
    pub color: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Translation key for `description`.
    pub description_key: String,
}

/// Category for an AQI value.
#[must_use]
pub fn aqi_category(aqi: i32) -> AqiCategory {
    let severity = Severity::from_aqi(aqi);
    let (level, color, description) = match severity {
        Severity::Good => ("Good", "#00e400", "Air quality is satisfactory"),
        Severity::Moderate => ("Moderate", "#ffff00", "Air quality is acceptable"),
        Severity::UnhealthySensitive => (
            "Unhealthy for Sensitive Groups",
            "#ff7e00",
            "Sensitive groups may experience health effects",
        ),
        Severity::Unhealthy => (
            "Unhealthy",
            "#ff0000",
            "Everyone may begin to experience health effects",
        ),
        Severity::VeryUnhealthy => (
            "Very Unhealthy",
            "#8f3f97",
            "Health alert: everyone may experience serious health effects",
        ),
        Severity::Hazardous => (
            "Hazardous",
            "#7e0023",
            "Health warning of emergency conditions",
        ),
    };
    AqiCategory {
        level,
        level_key: format!("aqi_level_{}", severity.as_str()),
        color,
        description,
        description_key: format!("aqi_desc_{}", severity.as_str()),
    }
}

/// Who the advice is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// `child`, `adult`, `elderly`, ...
    #[serde(default = "default_age_group")]
    pub age_group: String,
    /// Declared conditions such as `asthma`.
    #[serde(default)]
    pub conditions: Vec<String>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            age_group: default_age_group(),
            conditions: Vec::new(),
        }
    }
}

fn default_age_group() -> String {
    "adult".to_string()
}

impl UserProfile {
    /// Children, the elderly and people with asthma, heart disease or respiratory conditions.
    #[must_use]
    pub fn is_sensitive(&self) -> bool {
        matches!(self.age_group.as_str(), "child" | "elderly")
            || self
                .conditions
                .iter()
                .any(|c| matches!(c.as_str(), "asthma" | "heart_disease" | "respiratory"))
    }
}

/// A translatable line of advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Advice {
    /// Translation key.
    pub key: &'static str,
    /// English text.
    pub text: &'static str,
}

const fn advice(key: &'static str, text: &'static str) -> Advice {
    Advice { key, text }
}

/// Guidance for one AQI value and profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthRecommendation {
    /// AQI band.
    pub severity: Severity,
    /// Suggested activity level.
    pub activity_level: &'static str,
    /// Translation key for `activity_level`.
    pub activity_level_key: &'static str,
    /// Outdoor advice.
    pub outdoor_advice: &'static str,
    /// Translation key for `outdoor_advice`.
    pub outdoor_advice_key: &'static str,
    /// Practical tips.
    pub health_tips: Vec<Advice>,
    /// Health risks for the band.
    pub risks: Vec<Advice>,
}

/// Recommendation for `aqi`; sensitive profiles get stricter advice in the moderate and
/// sensitive-groups bands.
#[must_use]
pub fn health_recommendation(aqi: i32, profile: &UserProfile) -> HealthRecommendation {
    let severity = Severity::from_aqi(aqi);
    let sensitive = profile.is_sensitive();
    let (activity, outdoor, health_tips, risks) = match severity {
        Severity::Good => (
            advice("rec_activity_full", "Full outdoor activities recommended"),
            advice(
                "rec_outdoor_perfect",
                "Perfect day for jogging, cycling, and outdoor sports!",
            ),
            vec![advice("rec_tip_enjoy_fresh_air", "Enjoy the fresh air!")],
            vec![advice(
                "rec_risk_no_specific",
                "No specific health risks for the general population.",
            )],
        ),
        Severity::Moderate => {
            let risks = vec![advice(
                "rec_risk_sensitive_symptoms",
                "Unusually sensitive people may experience minor respiratory symptoms.",
            )];
            if sensitive {
                (
                    advice("rec_activity_light", "Light to moderate activities"),
                    advice(
                        "rec_outdoor_reduce",
                        "Consider reducing prolonged outdoor exertion",
                    ),
                    vec![advice(
                        "rec_tip_take_breaks",
                        "Take breaks during outdoor activities",
                    )],
                    risks,
                )
            } else {
                (
                    advice("rec_activity_normal", "Normal outdoor activities"),
                    advice("rec_outdoor_safe", "Safe for most outdoor activities"),
                    vec![advice("rec_tip_aqi_acceptable", "Air quality is acceptable")],
                    risks,
                )
            }
        }
        Severity::UnhealthySensitive => {
            let risks = vec![
                advice(
                    "rec_risk_sensitive_respiratory",
                    "Increased likelihood of respiratory symptoms in sensitive individuals.",
                ),
                advice(
                    "rec_risk_sensitive_aggravation",
                    "Aggravation of heart or lung disease and premature mortality in persons with cardiopulmonary disease and the elderly.",
                ),
            ];
            if sensitive {
                (
                    advice("rec_activity_reduce", "Reduce outdoor activities"),
                    advice(
                        "rec_outdoor_avoid_prolonged",
                        "Avoid prolonged outdoor exertion",
                    ),
                    vec![
                        advice("rec_tip_stay_indoors_possible", "Stay indoors if possible"),
                        advice("rec_tip_use_purifiers", "Use air purifiers at home"),
                    ],
                    risks,
                )
            } else {
                (
                    advice(
                        "rec_activity_moderate",
                        "Moderate outdoor activities acceptable",
                    ),
                    advice(
                        "rec_outdoor_reduce_intense",
                        "Consider reducing intense outdoor activities",
                    ),
                    vec![advice(
                        "rec_tip_monitor_symptoms",
                        "Monitor for symptoms like coughing",
                    )],
                    risks,
                )
            }
        }
        Severity::Unhealthy => (
            advice("rec_activity_avoid", "Avoid outdoor activities"),
            advice(
                "rec_outdoor_everyone_avoid",
                "Everyone should avoid prolonged outdoor exertion",
            ),
            vec![
                advice("rec_tip_stay_indoors_filtered", "Stay indoors with filtered air"),
                advice("rec_tip_wear_n95", "Wear N95 masks if you must go outside"),
            ],
            vec![
                advice(
                    "rec_risk_aggravation",
                    "Increased aggravation of heart or lung disease.",
                ),
                advice(
                    "rec_risk_widespread_respiratory",
                    "Widespread respiratory effects in the general population.",
                ),
            ],
        ),
        Severity::VeryUnhealthy => (
            advice("rec_activity_stay_indoors", "Stay indoors"),
            advice("rec_outdoor_avoid_all", "Avoid all outdoor activities"),
            vec![
                advice(
                    "rec_tip_emergency_indoors",
                    "Emergency: Stay indoors with air purification",
                ),
                advice(
                    "rec_tip_wear_n99",
                    "Wear N95/N99 masks if outdoor exposure is unavoidable",
                ),
            ],
            vec![
                advice(
                    "rec_risk_sig_aggravation",
                    "Significant aggravation of heart or lung disease.",
                ),
                advice(
                    "rec_risk_increased_respiratory",
                    "Increased respiratory effects in general population.",
                ),
                advice(
                    "rec_risk_serious_mortality",
                    "Serious risk of premature mortality in persons with cardiopulmonary disease and the elderly.",
                ),
            ],
        ),
        Severity::Hazardous => (
            advice("rec_activity_emergency", "Remain indoors - health emergency"),
            advice(
                "rec_outdoor_no_go",
                "Do not go outside unless absolutely necessary",
            ),
            vec![
                advice("rec_tip_health_alert", "HEALTH ALERT: Hazardous air quality"),
                advice("rec_tip_clean_room", "Create a clean room with air purifiers"),
                advice("rec_tip_follow_advisories", "Follow official health advisories"),
            ],
            vec![
                advice(
                    "rec_risk_serious_respiratory",
                    "Serious risk of respiratory effects in general population.",
                ),
                advice(
                    "rec_risk_hazardous_all",
                    "Hazardous for all individuals, especially those with existing conditions.",
                ),
            ],
        ),
    };
    HealthRecommendation {
        severity,
        activity_level: activity.text,
        activity_level_key: activity.key,
        outdoor_advice: outdoor.text,
        outdoor_advice_key: outdoor.key,
        health_tips,
        risks,
    }
}
