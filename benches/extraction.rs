use criterion::{Criterion, criterion_group, criterion_main};
use shop_rag::crawler::UrlScope;
use shop_rag::crawler::extractor::extract_page;
use std::fmt::Write;
use std::hint::black_box;
use url::Url;

fn catalog_page() -> String {
    let mut html = String::from(
        r#"<html><head><title>Produtos | EM Vidros</title>
        <meta name="description" content="Catálogo de vidros e espelhos"></head><body>
        <header><nav><a href="/">Início</a><a href="/contato">Contato</a></nav></header>
        <script>window.dataLayer = [];</script><main>"#,
    );
    for i in 0..200 {
        let _ = write!(
            html,
            r#"<section><h2>Produto {i}</h2>
            <p>Vidro temperado de 8mm para box, janelas e portas com instalação profissional.</p>
            <a href="/produtos/{i}">Detalhes</a><a href="/imagens/{i}.jpg">Foto</a></section>"#
        );
    }
    html.push_str("</main><footer>Rua das Flores, 100</footer></body></html>");
    html
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let page = catalog_page();
    let url = Url::parse("https://emvidros.com.br/produtos").expect("valid url");
    let scope = UrlScope::new(&url);

    c.bench_function("extraction", |b| {
        b.iter(|| extract_page(black_box(&page), &url, &scope))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
