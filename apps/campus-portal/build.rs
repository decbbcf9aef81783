fn main() {
    // Gera OUT_DIR/built.rs com versão do pacote, perfil e compilador
    built::write_built_file().expect("Falha ao coletar informações de build");
}
