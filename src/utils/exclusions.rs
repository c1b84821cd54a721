// projectbackup/src/utils/exclusions.rs

// Tables carried over from earlier incarnations of the tool that are never exported.
pub const EXCLUDED_TABLES: &[&str] = &[
    "in.c-kds-team-ex-mixpanel-152770611.output",
    "in.c-L1_RAW_PS_scenarios.scenario-execution-log",
    "in.c-L1_RAW_PS_scenarios.scenario_version",
    "in.c-L1_RAW_PS_stats.scenario_counter",
    "in.c-L1_RAW_PS_scenarios.scenario-log2",
    "out.c-L2_PS_scenarios.scenario_version",
    "out.c-L2_PS_scenarios.scenario_log2",
    "out.c-L2_PS_scenarios.scenario_module_snapshot",
    "out.c-3_scn.scn_daily_stats",
    "out.c-L2_PS_scenarios.scenario_snapshot",
    "out.c-L2_PS_users.user_snapshot",
    "out.c-L2_PS_users.company_user_snapshot",
    "out.c-3_org.org_scn_daily_stats",
    "out.c-L2_P_stats.scenario_counter",
];

/// Exact, case-sensitive match against [`EXCLUDED_TABLES`].
pub fn is_excluded(table_id: &str) -> bool {
    EXCLUDED_TABLES.contains(&table_id)
}
