use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use guardrail_core::{
    Capabilities, CreationStamp, DeletionMark, Entity, Filter, IdentityContext, OrderBy, TenantId,
    UpdateStamp,
};
use guardrail_infra::{CancellationToken, InMemoryCollection, Repository};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, PartialEq)]
struct Invoice {
    id: u64,
    tenant_id: TenantId,
    created: CreationStamp,
    updated: UpdateStamp,
    deletion: DeletionMark,
    amount_cents: i64,
}

impl Entity for Invoice {
    type Id = u64;

    fn id(&self) -> &u64 {
        &self.id
    }

    fn capabilities() -> Capabilities<Self> {
        Capabilities::<Self>::none()
            .with_creation_audit(|i| &i.created, |i| &mut i.created)
            .with_update_audit(|i| &i.updated, |i| &mut i.updated)
            .with_soft_delete(|i| &i.deletion, |i| &mut i.deletion)
            .with_tenant(|i| &i.tenant_id, |i| &mut i.tenant_id)
    }
}

fn invoice(id: u64, tenant: i64) -> Invoice {
    Invoice {
        id,
        tenant_id: TenantId::new(tenant),
        created: CreationStamp::default(),
        updated: UpdateStamp::default(),
        deletion: DeletionMark {
            is_deleted: id % 10 == 0,
            ..DeletionMark::default()
        },
        amount_cents: (id as i64 * 37) % 10_000,
    }
}

type InvoiceRepository = Repository<Invoice, Arc<InMemoryCollection<Invoice>>>;

/// `rows` invoices spread over four tenants, every tenth soft-deleted.
fn seeded_repository(rows: u64) -> InvoiceRepository {
    let port = Arc::new(InMemoryCollection::new());
    port.seed((0..rows).map(|id| invoice(id, (id % 4) as i64)))
        .unwrap();
    Repository::new(
        port,
        Arc::new(Invoice::capabilities()),
        IdentityContext::new("bench", TenantId::new(1)),
        Utc::now(),
    )
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn bench_scoped_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped_reads");
    let rt = runtime();
    let cancel = CancellationToken::new();

    for rows in [100u64, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*rows));
        let repo = seeded_repository(*rows);

        group.bench_with_input(BenchmarkId::new("get_all", rows), rows, |b, _| {
            b.iter(|| black_box(rt.block_on(repo.get_all(&cancel)).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("count_where", rows), rows, |b, _| {
            b.iter(|| {
                let filter = Filter::new(|i: &Invoice| i.amount_cents > 5_000);
                black_box(rt.block_on(repo.count_where(filter, &cancel)).unwrap())
            });
        });

        group.bench_with_input(BenchmarkId::new("unscoped_get_all", rows), rows, |b, _| {
            b.iter(|| black_box(rt.block_on(repo.unscoped().get_all(&cancel)).unwrap()));
        });
    }

    group.finish();
}

fn bench_paging(c: &mut Criterion) {
    let mut group = c.benchmark_group("paging");
    let rt = runtime();
    let cancel = CancellationToken::new();
    let repo = seeded_repository(10_000);

    for page_number in [1u64, 10, 50].iter() {
        group.bench_with_input(
            BenchmarkId::new("key_order", page_number),
            page_number,
            |b, &page| {
                b.iter(|| black_box(rt.block_on(repo.get_paged(25, page, &cancel)).unwrap()));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("amount_desc", page_number),
            page_number,
            |b, &page| {
                let view = repo
                    .view()
                    .order_by(OrderBy::desc(|i: &Invoice| i.amount_cents));
                b.iter(|| black_box(rt.block_on(repo.page(&view, 25, page, &cancel)).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_add_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_range_commit");
    let rt = runtime();
    let cancel = CancellationToken::new();

    for batch in [10u64, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*batch));
        group.bench_with_input(BenchmarkId::new("batch", batch), batch, |b, &size| {
            b.iter(|| {
                let mut repo = seeded_repository(0);
                let rows: Vec<Invoice> = (0..size).map(|id| invoice(id + 1, 1)).collect();
                black_box(rt.block_on(repo.add_range(rows, true, &cancel)).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scoped_reads, bench_paging, bench_add_range);
criterion_main!(benches);
