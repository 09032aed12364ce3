use lens_ir::{ColumnRef, FilterStep, JoinKind, OutputSource, PlanStep, QueryPlan, SortDirection};

/// One line per plan step, for logs and the `plan_summary` of a response
pub fn explain(plan: &QueryPlan) -> String {
    let mut out = format!(
        "FROM {} AS {} ({})",
        plan.root.table, plan.root.alias, plan.root.entity
    );

    for step in &plan.steps {
        let line = match step {
            PlanStep::Join(join) => format!(
                "{} JOIN {} AS {} ON {}.{} = {}.{} via {}",
                match join.kind {
                    JoinKind::Inner => "INNER",
                    JoinKind::Left => "LEFT",
                },
                join.target_table,
                join.alias,
                join.alias,
                join.remote_key,
                join.parent,
                join.local_key,
                join.path
            ),
            PlanStep::Filter(filter) => format!("FILTER {}", describe_filter(filter)),
            PlanStep::Group(group) => format!(
                "GROUP BY {}",
                group.keys.iter().map(column).collect::<Vec<_>>().join(", ")
            ),
            PlanStep::Aggregate(agg) => {
                let mut line = format!("AGGREGATE {}({}) AS {}", agg.function, column(&agg.column), agg.alias);
                if let Some(filter) = &agg.filter {
                    line.push_str(&format!(" WHERE {}", describe_filter(filter)));
                }
                line
            }
            PlanStep::Select(selection) => format!(
                "SELECT {}",
                selection
                    .columns
                    .iter()
                    .map(|c| match &c.source {
                        OutputSource::Column { column: col } => format!("{} AS {}", column(col), c.name),
                        OutputSource::Aggregate { alias } => alias.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            PlanStep::Order(order) => format!(
                "ORDER BY {}",
                order
                    .keys
                    .iter()
                    .map(|k| match k.direction {
                        SortDirection::Asc => format!("{} asc", k.output),
                        SortDirection::Desc => format!("{} desc", k.output),
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            PlanStep::Limit(limit) => format!("LIMIT {}", limit.limit),
        };
        out.push('\n');
        out.push_str(&line);
    }
    out
}

fn column(col: &ColumnRef) -> String {
    format!("{}.{}", col.source, col.column)
}

fn describe_filter(filter: &FilterStep) -> String {
    format!("{} {} {}", column(&filter.column), filter.operator, filter.value)
}
